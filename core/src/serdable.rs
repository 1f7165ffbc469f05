pub use self::glob::GlobPattern;
pub use self::regex::NamePattern;

pub mod glob {
    use std::ops::Deref;

    use ::glob::PatternError;
    use ::serde::{Deserialize, Serialize};

    /// A filename glob that round-trips through serde as its source string.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct GlobPattern(::glob::Pattern);

    impl GlobPattern {
        pub fn parse(pattern: &str) -> Result<Self, PatternError> {
            ::glob::Pattern::new(pattern).map(Self)
        }
    }

    impl Deref for GlobPattern {
        type Target = ::glob::Pattern;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl TryFrom<String> for GlobPattern {
        type Error = PatternError;

        fn try_from(s: String) -> Result<Self, Self::Error> {
            Self::parse(&s)
        }
    }

    impl From<GlobPattern> for String {
        fn from(p: GlobPattern) -> Self {
            p.0.as_str().to_owned()
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[test]
        fn glob_pattern_roundtrips_as_string() {
            let pat: GlobPattern = serde_json::from_str(r#""*.[ch]""#).unwrap();
            assert!(pat.matches("prog.c"));
            assert!(pat.matches("prog.h"));
            assert!(!pat.matches("prog.py"));
            assert_eq!(serde_json::to_string(&pat).unwrap(), r#""*.[ch]""#);
        }

        #[test]
        fn invalid_glob_is_rejected() {
            let res: Result<GlobPattern, _> = serde_json::from_str(r#""[a""#);
            assert!(res.is_err());
        }
    }
}

pub mod regex {
    use lazy_regex::Regex;
    use serde::{Deserialize, Serialize};

    /// A regular expression that must match a whole name (file name, module
    /// attribute, imported identifier), not merely a substring of it.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct NamePattern {
        source: String,
        anchored: Regex,
    }

    impl NamePattern {
        pub fn parse(pattern: &str) -> Result<Self, ::regex::Error> {
            let anchored = Regex::new(&format!("^(?:{})$", pattern))?;
            Ok(Self {
                source: pattern.to_owned(),
                anchored,
            })
        }

        pub fn as_str(&self) -> &str {
            &self.source
        }

        pub fn matches(&self, name: &str) -> bool {
            self.anchored.is_match(name)
        }
    }

    impl PartialEq for NamePattern {
        fn eq(&self, other: &Self) -> bool {
            self.source == other.source
        }
    }

    impl TryFrom<String> for NamePattern {
        type Error = ::regex::Error;

        fn try_from(s: String) -> Result<Self, Self::Error> {
            Self::parse(&s)
        }
    }

    impl From<NamePattern> for String {
        fn from(p: NamePattern) -> Self {
            p.source
        }
    }

    pub fn any_matches(patterns: &[NamePattern], name: &str) -> bool {
        patterns.iter().any(|p| p.matches(name))
    }

}
