pub mod project;

use std::collections::BTreeMap;

use maplit::btreemap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::error::{GradeError, Result};
use crate::serdable::NamePattern;

pub use project::{ProjectConfig, ToolchainOverride};

/// Minimum per-test timeout in seconds. Leaves one second of freeboard for
/// interpreter start-up.
pub const MIN_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(try_from = "String", into = "String")]
pub enum ExtraMode {
    #[default]
    None,
    Pretest,
    Posttest,
    Stdin,
}

/// How the tests of a precheck are chosen. Ordered: `Disabled < Empty < ...`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(try_from = "String", into = "String")]
pub enum PrecheckPolicy {
    Disabled,
    Empty,
    #[default]
    Examples,
    Selected,
    All,
}

macro_rules! string_enum_serde {
    ($($t:ty),*) => {$(
        impl TryFrom<String> for $t {
            type Error = strum::ParseError;
            fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
                s.trim().parse()
            }
        }
        impl From<$t> for String {
            fn from(v: $t) -> Self {
                v.to_string()
            }
        }
    )*};
}
string_enum_serde!(ExtraMode, PrecheckPolicy);

/// Allow/deny lists of whole-name patterns. With `only_allow` present a name
/// must match one of its patterns; an empty `only_allow` admits nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    #[serde(default, alias = "onlyallow", skip_serializing_if = "Option::is_none")]
    pub only_allow: Option<Vec<NamePattern>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallow: Vec<NamePattern>,
}

impl AccessRule {
    pub fn permits(&self, name: &str) -> bool {
        use crate::serdable::regex::any_matches;
        let allowed = self
            .only_allow
            .as_ref()
            .map_or(true, |pats| any_matches(pats, name));
        allowed && !any_matches(&self.disallow, name)
    }

    /// True when nothing at all may be taken from the module.
    pub fn forbids_everything(&self) -> bool {
        matches!(&self.only_allow, Some(v) if v.is_empty())
    }

    fn from_lists(only_allow: Option<&[&str]>, disallow: &[&str]) -> Self {
        let parse = |pats: &[&str]| {
            pats.iter()
                .filter_map(|p| NamePattern::parse(p).ok())
                .collect::<Vec<_>>()
        };
        Self {
            only_allow: only_allow.map(parse),
            disallow: parse(disallow),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequiredSubstring {
    Plain(String),
    Pattern {
        pattern: String,
        #[serde(alias = "errormessage")]
        error_message: String,
    },
    Literal {
        string: String,
        #[serde(alias = "errormessage")]
        error_message: String,
    },
}

/// Grading policy of one submission. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub timeout: u64,
    pub total_timeout: u64,
    pub strict_whitespace: bool,
    pub float_tolerance: Option<f64>,
    pub max_output_bytes: usize,
    pub max_string_length: usize,
    pub all_or_nothing: bool,
    pub hidden_fail_scale: Option<f64>,
    pub abort_on_error: bool,
    pub run_tests_singly: bool,
    pub is_function: bool,
    pub extra: ExtraMode,
    pub global_extra: ExtraMode,
    pub global_extra_code: String,
    pub prelude: String,
    pub imports: Vec<String>,
    pub no_style_checks: bool,
    pub proscribed_functions: Vec<String>,
    pub required_function_calls: Vec<String>,
    pub required_function_definitions: Vec<String>,
    pub proscribed_constructs: Vec<String>,
    pub required_constructs: Vec<String>,
    pub proscribed_substrings: Vec<String>,
    pub required_substrings: Vec<RequiredSubstring>,
    pub max_function_length: usize,
    pub max_num_constants: usize,
    pub ban_global_code: bool,
    pub allow_nested_functions: bool,
    pub require_type_hints: bool,
    pub restricted_modules: BTreeMap<String, AccessRule>,
    pub restricted_files: AccessRule,
    pub proscribed_builtins: Vec<String>,
    pub echo_standard_input: bool,
    pub precheckers: Vec<String>,
    pub linters: BTreeMap<String, String>,
    pub pylint_options: Vec<String>,
    pub warn_if_passive_output: bool,
    pub strip_main: bool,
    pub strip_main_if_present: bool,
    pub lenient_precheck: bool,
    pub memory_limit_kb: u64,
    pub file_size_limit_kb: u64,
    pub allow_positive_return: bool,
    pub precheck_policy: PrecheckPolicy,
    pub compile_flags: Option<Vec<String>>,
    pub link_flags: Option<Vec<String>>,
    pub check_config_params: bool,

    #[serde(skip)]
    pub unknown_keys: Vec<String>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            timeout: 5,
            total_timeout: 50,
            strict_whitespace: true,
            float_tolerance: None,
            max_output_bytes: 10000,
            max_string_length: 2000,
            all_or_nothing: true,
            hidden_fail_scale: None,
            abort_on_error: true,
            run_tests_singly: false,
            is_function: true,
            extra: ExtraMode::None,
            global_extra: ExtraMode::None,
            global_extra_code: String::new(),
            prelude: String::new(),
            imports: Vec::new(),
            no_style_checks: false,
            proscribed_functions: Vec::new(),
            required_function_calls: Vec::new(),
            required_function_definitions: Vec::new(),
            proscribed_constructs: vec!["goto".to_owned()],
            required_constructs: Vec::new(),
            proscribed_substrings: Vec::new(),
            required_substrings: Vec::new(),
            max_function_length: 30,
            max_num_constants: 4,
            ban_global_code: true,
            allow_nested_functions: false,
            require_type_hints: false,
            restricted_modules: default_restricted_modules(),
            restricted_files: AccessRule::from_lists(None, &["__.*", "prog.*"]),
            proscribed_builtins: vec!["exec".to_owned(), "eval".to_owned()],
            echo_standard_input: true,
            precheckers: Vec::new(),
            linters: BTreeMap::new(),
            pylint_options: Vec::new(),
            warn_if_passive_output: true,
            strip_main: false,
            strip_main_if_present: false,
            lenient_precheck: false,
            memory_limit_kb: 4_000_000,
            file_size_limit_kb: 8192,
            allow_positive_return: false,
            precheck_policy: PrecheckPolicy::Examples,
            compile_flags: None,
            link_flags: None,
            check_config_params: true,
            unknown_keys: Vec::new(),
        }
    }
}

fn default_restricted_modules() -> BTreeMap<String, AccessRule> {
    let nothing = || AccessRule::from_lists(Some(&[]), &[]);
    btreemap! {
        "builtins".to_owned() => nothing(),
        "imp".to_owned() => nothing(),
        "importlib".to_owned() => nothing(),
        "subprocess".to_owned() => nothing(),
        "os".to_owned() => AccessRule::from_lists(None, &["system", "_exit", "_.*"]),
        "sys".to_owned() => AccessRule::from_lists(None, &["_.*"]),
    }
}

/// Canonical key names. Host keys are matched ignoring case and underscores,
/// so `floattolerance`, `floatTolerance` and `float_tolerance` are the same.
const KEYS: &[&str] = &[
    "timeout",
    "total_timeout",
    "strict_whitespace",
    "float_tolerance",
    "max_output_bytes",
    "max_string_length",
    "all_or_nothing",
    "hidden_fail_scale",
    "abort_on_error",
    "run_tests_singly",
    "is_function",
    "extra",
    "global_extra",
    "global_extra_code",
    "prelude",
    "imports",
    "no_style_checks",
    "proscribed_functions",
    "required_function_calls",
    "required_function_definitions",
    "proscribed_constructs",
    "required_constructs",
    "proscribed_substrings",
    "required_substrings",
    "max_function_length",
    "max_num_constants",
    "ban_global_code",
    "allow_nested_functions",
    "require_type_hints",
    "restricted_modules",
    "restricted_files",
    "proscribed_builtins",
    "echo_standard_input",
    "precheckers",
    "linters",
    "pylint_options",
    "warn_if_passive_output",
    "strip_main",
    "strip_main_if_present",
    "lenient_precheck",
    "memory_limit_kb",
    "file_size_limit_kb",
    "allow_positive_return",
    "precheck_policy",
    "compile_flags",
    "link_flags",
    "check_config_params",
];

fn squash(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn canonical_key(key: &str) -> Option<&'static str> {
    let squashed = squash(key);
    KEYS.iter().copied().find(|k| squash(k) == squashed)
}

impl GradingConfig {
    /// Merges a host-supplied flat map over the defaults.
    ///
    /// Keys starting with `_` are private to the host and ignored. Other
    /// unknown keys are collected in `unknown_keys`. A known key with a value
    /// of the wrong type is a [`GradeError::BadConfig`].
    pub fn from_map(params: &Map<String, Value>) -> Result<Self> {
        let mut normalized = Map::new();
        let mut unknown = Vec::new();

        for (key, value) in params {
            if key.starts_with('_') {
                continue;
            }
            match (canonical_key(key), squash(key).as_str()) {
                (Some(k), _) => {
                    if value.is_null() && !k.ends_with("tolerance") && !k.ends_with("scale") {
                        continue;
                    }
                    normalized.insert(k.to_owned(), value.clone());
                }
                // Legacy spellings with inverted or folded meaning.
                (None, "allowglobals") => {
                    let allow = value
                        .as_bool()
                        .ok_or_else(|| GradeError::bad_config(key, "expected a boolean"))?;
                    normalized.insert("ban_global_code".to_owned(), Value::Bool(!allow));
                }
                (None, "runextra") => {
                    if value.as_bool() == Some(true) {
                        normalized.insert("extra".to_owned(), Value::from("pretest"));
                    }
                }
                (None, "stdinfromextra") => {
                    if value.as_bool() == Some(true) {
                        normalized.insert("extra".to_owned(), Value::from("stdin"));
                    }
                }
                (None, _) => unknown.push(key.clone()),
            }
        }

        for (key, value) in &normalized {
            let single = Value::Object(Map::from_iter([(key.clone(), value.clone())]));
            serde_json::from_value::<GradingConfig>(single)
                .map_err(|e| GradeError::bad_config(key, e))?;
        }

        let mut cfg: GradingConfig = serde_json::from_value(Value::Object(normalized))
            .map_err(|e| GradeError::bad_config("*", e))?;

        if cfg.timeout < MIN_TIMEOUT_SECS {
            cfg.timeout = MIN_TIMEOUT_SECS;
        }
        if let Some(tol) = cfg.float_tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(GradeError::bad_config(
                    "float_tolerance",
                    "must be a non-negative number",
                ));
            }
        }

        unknown.sort();
        if cfg.check_config_params && !unknown.is_empty() {
            log::warn!("Unexpected config parameter(s): {:?}", unknown);
            cfg.unknown_keys = unknown;
        }
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| GradeError::bad_config("*", e))?;
        match value {
            Value::Object(map) => Self::from_map(&map),
            Value::Null => Ok(Self::default()),
            _ => Err(GradeError::bad_config("*", "config must be a JSON object")),
        }
    }

    /// True when the test `extra` field is standard input rather than code.
    pub fn stdin_from_extra(&self) -> bool {
        self.extra == ExtraMode::Stdin
    }
}
