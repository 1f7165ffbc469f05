pub mod program;
pub mod remap;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::collections::GlobMap;
use crate::config::{GradingConfig, ToolchainOverride};
use crate::serdable::GlobPattern;

pub use program::ProgramBuilder;
pub use remap::LineRemapper;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[strum(to_string = "python3", serialize = "python", serialize = "py")]
    Python3,
    C,
    #[strum(to_string = "cpp", serialize = "c++")]
    Cpp,
}

impl Language {
    pub fn is_compiled(self) -> bool {
        !matches!(self, Self::Python3)
    }

    /// Source-level style analysis (tree walk) is only available for Python.
    pub fn has_syntax_walker(self) -> bool {
        matches!(self, Self::Python3)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Python3 => "py",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    pub fn builtin_rules() -> GlobMap<Language> {
        [
            ("*.py", Self::Python3),
            ("*.c", Self::C),
            ("*.cpp", Self::Cpp),
            ("*.cc", Self::Cpp),
            ("*.cxx", Self::Cpp),
        ]
        .into_iter()
        .filter_map(|(pat, lang)| GlobPattern::parse(pat).ok().map(|p| (p, lang)))
        .collect()
    }

    /// Project rules take precedence over the built-in extension table.
    pub fn detect(filename: &str, project_rules: &GlobMap<Language>) -> Option<Self> {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename);
        if let Some(lang) = project_rules.get(name) {
            return Some(*lang);
        }
        Self::builtin_rules().get(name).copied()
    }

    pub fn default_toolchain(self) -> Toolchain {
        let s = |v: &str| v.to_owned();
        match self {
            Self::Python3 => Toolchain {
                source_file: s("prog.py"),
                executable: s("prog.py"),
                check: Some(s("python3 -m py_compile #{src}")),
                compile: None,
                compile_object: None,
                run: s("python3 #{src}"),
                flags: Vec::new(),
                ldflags: Vec::new(),
            },
            Self::C => Toolchain {
                source_file: s("prog.c"),
                executable: s("prog"),
                check: None,
                compile: Some(s("gcc #{flags} -o #{exe} #{src} #{ldflags}")),
                compile_object: Some(s("gcc #{flags} -c -o #{exe}.o #{src}")),
                run: s("./#{exe}"),
                flags: vec![s("-std=c99"), s("-Wall"), s("-Werror")],
                ldflags: vec![s("-lm")],
            },
            Self::Cpp => Toolchain {
                source_file: s("prog.cpp"),
                executable: s("prog"),
                check: None,
                compile: Some(s("g++ #{flags} -o #{exe} #{src} #{ldflags}")),
                compile_object: Some(s("g++ #{flags} -c -o #{exe}.o #{src}")),
                run: s("./#{exe}"),
                flags: vec![s("-std=c++17"), s("-Wall"), s("-Werror")],
                ldflags: vec![s("-lm")],
            },
        }
    }
}

/// Command templates of one language. `#{src}`, `#{exe}`, `#{flags}`,
/// `#{ldflags}` and `#{dir}` are substituted by [`Toolchain::vars`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub source_file: String,
    pub executable: String,
    /// Syntax check for interpreted languages.
    pub check: Option<String>,
    /// Builds an executable.
    pub compile: Option<String>,
    /// Compiles without linking, for candidates that have no entry point yet.
    pub compile_object: Option<String>,
    pub run: String,
    pub flags: Vec<String>,
    pub ldflags: Vec<String>,
}

impl Toolchain {
    pub fn overridden(mut self, ov: &ToolchainOverride) -> Self {
        let ToolchainOverride {
            check,
            compile,
            compile_object,
            run,
            flags,
            ldflags,
        } = ov;
        if let Some(v) = check {
            self.check = Some(v.clone());
        }
        if let Some(v) = compile {
            self.compile = Some(v.clone());
        }
        if let Some(v) = compile_object {
            self.compile_object = Some(v.clone());
        }
        if let Some(v) = run {
            self.run = v.clone();
        }
        if let Some(v) = flags {
            self.flags = v.clone();
        }
        if let Some(v) = ldflags {
            self.ldflags = v.clone();
        }
        self
    }

    /// Per-question flags from the grading config win over toolchain defaults.
    pub fn with_config(mut self, cfg: &GradingConfig) -> Self {
        if let Some(flags) = &cfg.compile_flags {
            self.flags = flags.clone();
        }
        if let Some(flags) = &cfg.link_flags {
            self.ldflags = flags.clone();
        }
        self
    }

    pub fn vars(&self, dir: &Path) -> HashMap<&'static str, String> {
        HashMap::from([
            ("src", self.source_file.clone()),
            ("exe", self.executable.clone()),
            ("flags", self.flags.join(" ")),
            ("ldflags", self.ldflags.join(" ")),
            ("dir", dir.to_string_lossy().into_owned()),
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::template;
    use strum::IntoEnumIterator;

    #[test]
    fn language_names() {
        assert_eq!("python3".parse::<Language>().unwrap(), Language::Python3);
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python3);
        assert_eq!("c".parse::<Language>().unwrap(), Language::C);
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!(Language::Cpp.to_string(), "cpp");
        assert!("rust".parse::<Language>().is_err());
    }

    #[test]
    fn detection_prefers_project_rules() {
        assert_eq!(
            Language::detect("dir/answer.py", &GlobMap::new()),
            Some(Language::Python3)
        );
        assert_eq!(Language::detect("x.cc", &GlobMap::new()), Some(Language::Cpp));
        assert_eq!(Language::detect("x.rs", &GlobMap::new()), None);

        let rules: GlobMap<_> = [(GlobPattern::parse("*.c").unwrap(), Language::Cpp)]
            .into_iter()
            .collect();
        assert_eq!(Language::detect("x.c", &rules), Some(Language::Cpp));
    }

    #[test]
    fn default_templates_render() {
        for lang in Language::iter() {
            let tc = lang.default_toolchain();
            let vars = tc.vars(Path::new("/tmp/w"));
            for t in [&tc.check, &tc.compile, &tc.compile_object]
                .into_iter()
                .flatten()
                .chain([&tc.run])
            {
                template::render(t, &vars).unwrap();
            }
        }
        let c = Language::C.default_toolchain();
        assert_eq!(
            template::render(c.compile.as_deref().unwrap(), &c.vars(Path::new("."))).unwrap(),
            "gcc -std=c99 -Wall -Werror -o prog prog.c -lm"
        );
    }

    #[test]
    fn overrides_apply_field_by_field() {
        let ov = ToolchainOverride {
            run: Some("valgrind ./#{exe}".to_owned()),
            flags: Some(vec!["-O2".to_owned()]),
            ..Default::default()
        };
        let tc = Language::C.default_toolchain().overridden(&ov);
        assert_eq!(tc.run, "valgrind ./#{exe}");
        assert_eq!(tc.flags, vec!["-O2"]);
        assert_eq!(tc.ldflags, vec!["-lm"]);

        let cfg = GradingConfig {
            link_flags: Some(vec![]),
            ..Default::default()
        };
        assert!(tc.with_config(&cfg).ldflags.is_empty());
    }
}
