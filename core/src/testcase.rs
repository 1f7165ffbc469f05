use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{GradeError, Result};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive, serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayPolicy {
    #[default]
    Show,
    Hide,
    HideIfSucceed,
    HideIfFail,
}

impl DisplayPolicy {
    pub fn hides(self, passed: bool) -> bool {
        match self {
            Self::Show => false,
            Self::Hide => true,
            Self::HideIfSucceed => passed,
            Self::HideIfFail => !passed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestKind {
    #[default]
    Normal,
    PrecheckOnly,
    Both,
}

impl TestKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::PrecheckOnly),
            2 => Some(Self::Both),
            _ => None,
        }
    }
}

/// One test of a question. Built once from host data and never mutated; the
/// `with_*` methods consume and return a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    code: String,
    stdin: String,
    expected: String,
    extra: String,
    display: DisplayPolicy,
    hide_rest_if_fail: bool,
    is_example: bool,
    kind: TestKind,
    mark: f64,
}

impl TestCase {
    pub fn new(code: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin: String::new(),
            expected: expected.into(),
            extra: String::new(),
            display: DisplayPolicy::Show,
            hide_rest_if_fail: false,
            is_example: false,
            kind: TestKind::Normal,
            mark: 1.0,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = expected.into();
        self
    }

    pub fn with_display(mut self, display: DisplayPolicy) -> Self {
        self.display = display;
        self
    }

    pub fn with_hide_rest_if_fail(mut self, yes: bool) -> Self {
        self.hide_rest_if_fail = yes;
        self
    }

    pub fn with_example(mut self, yes: bool) -> Self {
        self.is_example = yes;
        self
    }

    pub fn with_kind(mut self, kind: TestKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_mark(mut self, mark: f64) -> Result<Self> {
        if !mark.is_finite() || mark < 0.0 {
            return Err(GradeError::BadTestData(format!(
                "test mark must be a non-negative number, got {}",
                mark
            )));
        }
        self.mark = mark;
        Ok(self)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn stdin(&self) -> &str {
        &self.stdin
    }

    pub fn expected(&self) -> &str {
        &self.expected
    }

    pub fn extra(&self) -> &str {
        &self.extra
    }

    pub fn display(&self) -> DisplayPolicy {
        self.display
    }

    pub fn hide_rest_if_fail(&self) -> bool {
        self.hide_rest_if_fail
    }

    pub fn is_example(&self) -> bool {
        self.is_example
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn mark(&self) -> f64 {
        self.mark
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawTestCase = serde_json::from_value(value)
            .map_err(|e| GradeError::BadTestData(format!("malformed test case: {}", e)))?;
        raw.validate()
    }

    pub fn list_from_json_str(s: &str) -> Result<Vec<Self>> {
        let values: Vec<Value> = serde_json::from_str(s)
            .map_err(|e| GradeError::BadTestData(format!("tests must be a JSON array: {}", e)))?;
        values.into_iter().map(Self::from_json).collect()
    }
}

/// Host wire format. Flags and numbers arrive as booleans, numbers or
/// numeric strings depending on the host, so they are kept loose here.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTestCase {
    #[serde(alias = "code")]
    testcode: Option<String>,
    stdin: Option<String>,
    expected: Option<String>,
    extra: Option<String>,
    display: Option<String>,
    #[serde(alias = "kind", alias = "test_type")]
    testtype: Option<Value>,
    #[serde(alias = "hide_rest_if_fail")]
    hiderestiffail: Option<Value>,
    #[serde(alias = "is_example", alias = "use_as_example")]
    useasexample: Option<Value>,
    mark: Option<Value>,
}

impl RawTestCase {
    fn validate(self) -> Result<TestCase> {
        let display = match self.display.as_deref().map(str::trim) {
            None | Some("") => DisplayPolicy::Show,
            Some(s) => s
                .parse()
                .map_err(|_| GradeError::BadTestData(format!("unknown display policy '{}'", s)))?,
        };

        let kind = match &self.testtype {
            None | Some(Value::Null) => TestKind::Normal,
            Some(v) => loose_int(v)
                .and_then(TestKind::from_code)
                .ok_or_else(|| GradeError::BadTestData(format!("unknown test type {}", v)))?,
        };

        let mark = match &self.mark {
            None | Some(Value::Null) => 1.0,
            Some(v) => loose_float(v)
                .ok_or_else(|| GradeError::BadTestData(format!("test mark {} is not a number", v)))?,
        };

        TestCase::new(
            self.testcode.unwrap_or_default(),
            self.expected.unwrap_or_default(),
        )
        .with_stdin(self.stdin.unwrap_or_default())
        .with_extra(self.extra.unwrap_or_default())
        .with_display(display)
        .with_hide_rest_if_fail(self.hiderestiffail.as_ref().map_or(false, loose_bool))
        .with_example(self.useasexample.as_ref().map_or(false, loose_bool))
        .with_kind(kind)
        .with_mark(mark)
    }
}

fn loose_bool(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !matches!(s.trim(), "" | "0" | "false" | "False"),
        _ => false,
    }
}

fn loose_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_host_fields() {
        let t = TestCase::from_json(json!({
            "testcode": "print(sqr(2))",
            "stdin": "",
            "expected": "4\n",
            "extra": "",
            "display": "hide_if_fail",
            "testtype": "2",
            "hiderestiffail": "1",
            "useasexample": 1,
            "mark": "2.5",
        }))
        .unwrap();
        assert_eq!(t.code(), "print(sqr(2))");
        assert_eq!(t.expected(), "4\n");
        assert_eq!(t.display(), DisplayPolicy::HideIfFail);
        assert_eq!(t.kind(), TestKind::Both);
        assert!(t.hide_rest_if_fail());
        assert!(t.is_example());
        assert_eq!(t.mark(), 2.5);
    }

    #[test]
    fn missing_fields_take_neutral_defaults() {
        let t = TestCase::from_json(json!({ "expected": "x" })).unwrap();
        assert_eq!(t.code(), "");
        assert_eq!(t.display(), DisplayPolicy::Show);
        assert_eq!(t.kind(), TestKind::Normal);
        assert!(!t.hide_rest_if_fail());
        assert!(!t.is_example());
        assert_eq!(t.mark(), 1.0);
    }

    #[test]
    fn rejects_bad_data() {
        for bad in [
            json!({ "mark": -1 }),
            json!({ "mark": "lots" }),
            json!({ "display": "SOMETIMES" }),
            json!({ "testtype": 7 }),
        ] {
            match TestCase::from_json(bad) {
                Err(GradeError::BadTestData(_)) => {}
                other => panic!("expected BadTestData, got {:?}", other),
            }
        }
    }

    #[test]
    fn display_policy_visibility() {
        assert!(!DisplayPolicy::Show.hides(false));
        assert!(DisplayPolicy::Hide.hides(true));
        assert!(DisplayPolicy::HideIfSucceed.hides(true));
        assert!(!DisplayPolicy::HideIfSucceed.hides(false));
        assert!(DisplayPolicy::HideIfFail.hides(false));
        assert!(!DisplayPolicy::HideIfFail.hides(true));
    }
}
