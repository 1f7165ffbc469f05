pub use self::glob_map::GlobMap;

pub mod glob_map {
    use serde::Deserialize;

    use crate::serdable::GlobPattern;

    /// Ordered list of `(glob, value)` rules. Lookup returns the value of the
    /// first rule whose glob matches, so earlier rules shadow later ones.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GlobMap<V> {
        rules: Vec<(GlobPattern, V)>,
    }

    pub type Iter<'a, V> = std::slice::Iter<'a, (GlobPattern, V)>;

    impl<V> Default for GlobMap<V> {
        fn default() -> Self {
            Self { rules: Vec::new() }
        }
    }

    impl<V> GlobMap<V> {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_empty(&self) -> bool {
            self.rules.is_empty()
        }

        pub fn len(&self) -> usize {
            self.rules.len()
        }

        /// Replaces the value of an identical glob in place, keeping its priority.
        pub fn insert(&mut self, k: GlobPattern, mut v: V) -> Option<V> {
            match self.rules.iter_mut().find(|(pat, _)| pat == &k) {
                Some((_, value)) => {
                    std::mem::swap(value, &mut v);
                    Some(v)
                }
                None => {
                    self.rules.push((k, v));
                    None
                }
            }
        }

        pub fn get(&self, name: impl AsRef<str>) -> Option<&V> {
            let name = name.as_ref();
            self.rules
                .iter()
                .find(|(pattern, _)| pattern.matches(name))
                .map(|(_, value)| value)
        }

        /// Appends the rules of `fallback` that are not already present.
        pub fn with_fallback(mut self, fallback: GlobMap<V>) -> Self {
            for (k, v) in fallback.rules {
                if !self.rules.iter().any(|(pat, _)| pat == &k) {
                    self.rules.push((k, v));
                }
            }
            self
        }

        pub fn iter(&self) -> Iter<'_, V> {
            self.rules.iter()
        }
    }

    impl<V> FromIterator<(GlobPattern, V)> for GlobMap<V> {
        fn from_iter<I>(iter: I) -> Self
        where
            I: IntoIterator<Item = (GlobPattern, V)>,
        {
            let mut m = Self::new();
            for (k, v) in iter {
                m.insert(k, v);
            }
            m
        }
    }

    /// TOML/JSON form: `[{ pattern = "*.py", value = ... }, ...]`
    #[derive(Deserialize)]
    struct Rule<V> {
        pattern: GlobPattern,
        #[serde(alias = "language", alias = "lang")]
        value: V,
    }

    impl<'de, V> Deserialize<'de> for GlobMap<V>
    where
        V: Deserialize<'de>,
    {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let rules = Vec::<Rule<V>>::deserialize(deserializer)?;
            Ok(rules.into_iter().map(|r| (r.pattern, r.value)).collect())
        }
    }

}
