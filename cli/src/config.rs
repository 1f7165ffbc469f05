use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context as _};
use assess_core::{config::ProjectConfig, lang::Language, TestCase};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{cmd::GlobalArgs, util};

pub const APP_NAME: &str = "assess";

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub cache_dir: PathBuf,
}

impl GlobalConfig {
    fn default_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(dir) => dir.join(APP_NAME),
            None => std::env::temp_dir().join(APP_NAME),
        }
    }

    pub fn from_args(args: &GlobalArgs) -> Self {
        Self {
            cache_dir: args
                .cache_dir
                .clone()
                .unwrap_or_else(Self::default_cache_dir),
        }
    }

    /// A fresh scratch directory for one grading run.
    pub fn work_dir(&self) -> PathBuf {
        self.cache_dir.join(format!("run-{}", std::process::id()))
    }
}

/// One grading request as a JSON document.
///
/// ```json
/// { "language": "python3", "answer": "...", "tests": [...], "config": {...},
///   "is_precheck": false, "author_answer": null }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Job {
    pub language: Option<String>,
    pub answer: String,
    pub tests: Vec<Value>,
    pub config: Map<String, Value>,
    pub is_precheck: bool,
    pub author_answer: Option<String>,
}

impl Job {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        fsutil::read_json_with_deserialize(path).context("Failed to load the job file")
    }

    pub fn test_cases(&self) -> anyhow::Result<Vec<TestCase>> {
        self.tests
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, v)| TestCase::from_json(v).with_context(|| format!("test #{}", i + 1)))
            .collect()
    }

    /// The job's own language, else the one the answer file name suggests.
    pub fn language(&self, project: &ProjectConfig, source: Option<&Path>) -> anyhow::Result<Language> {
        if let Some(name) = &self.language {
            return Language::from_str(name).map_err(|_| anyhow!("Unknown language '{}'", name));
        }
        source
            .and_then(|p| p.to_str())
            .and_then(|name| project.detect_language(name))
            .ok_or_else(|| anyhow!("Cannot tell the language; pass --language"))
    }
}

/// Reads a JSON object of grading parameters.
pub fn read_params(path: &Path) -> anyhow::Result<Map<String, Value>> {
    let value: Value = fsutil::read_json_with_deserialize(path)?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(anyhow!(
            "{:?}: grading parameters must be a JSON object",
            util::replace_homedir_to_tilde(path)
        )),
    }
}

pub fn load_project() -> anyhow::Result<ProjectConfig> {
    Ok(ProjectConfig::from_file_finding_in_ancestors(util::current_dir()?)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_document() {
        let job: Job = serde_json::from_value(json!({
            "language": "python",
            "answer": "def f(): pass",
            "tests": [{ "testcode": "print(f())", "expected": "None\n", "mark": "2" }],
            "config": { "allornothing": false },
        }))
        .unwrap();
        assert!(!job.is_precheck);
        assert_eq!(job.author_answer, None);
        assert_eq!(job.language(&ProjectConfig::default(), None).unwrap(), Language::Python3);

        let tests = job.test_cases().unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].mark(), 2.0);
        assert_eq!(tests[0].code(), "print(f())");
    }

    #[test]
    fn language_from_file_name() {
        let job = Job::default();
        let project = ProjectConfig::default();
        assert_eq!(
            job.language(&project, Some(Path::new("q1/answer.c"))).unwrap(),
            Language::C
        );
        assert!(job.language(&project, Some(Path::new("answer.txt"))).is_err());
        assert!(Job {
            language: Some("cobol".to_owned()),
            ..Default::default()
        }
        .language(&project, None)
        .is_err());
    }

    #[test]
    fn bad_test_is_reported_with_its_index() {
        let job = Job {
            tests: vec![json!({ "expected": "1" }), json!({ "mark": -1 })],
            ..Default::default()
        };
        let err = job.test_cases().unwrap_err();
        assert_eq!(err.to_string(), "test #2");
    }
}
