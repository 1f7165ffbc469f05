use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::GradingConfig;
use crate::collections::GlobMap;
use crate::error::{GradeError, Result};
use crate::lang::{Language, Toolchain};

/// Per-language command overrides from `[toolchain.<language>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolchainOverride {
    pub check: Option<String>,
    pub compile: Option<String>,
    pub compile_object: Option<String>,
    pub run: Option<String>,
    pub flags: Option<Vec<String>>,
    pub ldflags: Option<Vec<String>>,
}

/// Contents of an `assess.toml` project file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    #[serde(skip)]
    pub source_config_file: Option<PathBuf>,
    /// Flat grading parameters, merged like host-supplied ones.
    pub grading: Map<String, Value>,
    pub toolchain: BTreeMap<Language, ToolchainOverride>,
    pub languages: GlobMap<Language>,
}

impl ProjectConfig {
    pub const FILENAME: &str = "assess.toml";

    pub fn example_toml() -> Option<String> {
        crate::assets::text(Self::FILENAME)
    }

    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_toml_file(filepath: PathBuf) -> Result<Self> {
        let toml = fsutil::read_to_string(&filepath)?;
        let mut cfg =
            Self::from_toml(&toml).map_err(|e| GradeError::ProjectFile(filepath.clone(), e))?;
        cfg.source_config_file = Some(filepath);
        Ok(cfg)
    }

    /// Looks for the project file in `cur_dir` and its ancestors.
    pub fn find_file_in_ancestors(cur_dir: impl AsRef<Path>) -> Option<PathBuf> {
        cur_dir
            .as_ref()
            .ancestors()
            .map(|dir| dir.join(Self::FILENAME))
            .find(|path| path.is_file())
    }

    /// The nearest project file, or the empty project when there is none.
    pub fn from_file_finding_in_ancestors(cur_dir: impl AsRef<Path>) -> Result<Self> {
        match Self::find_file_in_ancestors(cur_dir) {
            Some(path) => {
                log::info!("Using project file {:?}", path);
                Self::from_toml_file(path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Grading parameters of the project with `overrides` merged on top.
    pub fn grading_config(&self, overrides: &Map<String, Value>) -> Result<GradingConfig> {
        let mut params = self.grading.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        GradingConfig::from_map(&params)
    }

    pub fn toolchain_for(&self, language: Language) -> Toolchain {
        let tc = language.default_toolchain();
        match self.toolchain.get(&language) {
            Some(ov) => tc.overridden(ov),
            None => tc,
        }
    }

    pub fn detect_language(&self, filename: &str) -> Option<Language> {
        Language::detect(filename, &self.languages)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn example_toml_should_be_parsable() {
        let toml = ProjectConfig::example_toml().unwrap();
        let project = dbg!(ProjectConfig::from_toml(&toml)).unwrap();

        assert_eq!(project.source_config_file, None);
        assert_eq!(project.grading["timeout"], json!(5));
        assert_eq!(project.grading["all_or_nothing"], json!(false));

        let cfg = project.grading_config(&Map::new()).unwrap();
        assert_eq!(cfg.timeout, 5);
        assert!(!cfg.all_or_nothing);
        assert!(cfg.unknown_keys.is_empty());

        let c = project.toolchain_for(Language::C);
        assert_eq!(c.flags, vec!["-std=c99", "-Wall", "-Werror", "-g"]);
        assert_eq!(project.detect_language("main.h"), Some(Language::C));
        assert_eq!(project.detect_language("main.py"), Some(Language::Python3));
    }

    #[test]
    fn overrides_win_over_project_values() {
        let project = ProjectConfig::from_toml("[grading]\ntimeout = 7\nstrict_whitespace = false\n")
            .unwrap();
        let overrides = match json!({ "timeout": 3 }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let cfg = project.grading_config(&overrides).unwrap();
        assert_eq!(cfg.timeout, 3);
        assert!(!cfg.strict_whitespace);
        assert_eq!(project.toolchain_for(Language::Python3), Language::Python3.default_toolchain());
    }

    #[test]
    fn file_is_found_in_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("q1/attempts");
        fsutil::mkdir_all(&sub).unwrap();
        assert_eq!(ProjectConfig::find_file_in_ancestors(&sub), None);
        assert_eq!(
            ProjectConfig::from_file_finding_in_ancestors(&sub).unwrap(),
            ProjectConfig::default()
        );

        let path = dir.path().join(ProjectConfig::FILENAME);
        fsutil::write(&path, "[toolchain.python3]\nrun = \"python3 -I #{src}\"\n").unwrap();
        assert_eq!(ProjectConfig::find_file_in_ancestors(&sub), Some(path.clone()));
        let project = ProjectConfig::from_file_finding_in_ancestors(&sub).unwrap();
        assert_eq!(project.source_config_file, Some(path));
        assert_eq!(project.toolchain_for(Language::Python3).run, "python3 -I #{src}");
    }

    #[test]
    fn unknown_toolchain_fields_are_rejected() {
        assert!(ProjectConfig::from_toml("[toolchain.c]\ncompiler = \"clang\"\n").is_err());
        assert!(ProjectConfig::from_toml("[toolchain.rust]\nrun = \"x\"\n").is_err());
    }
}
