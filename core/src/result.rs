pub mod compare;
pub mod sanitize;

use std::sync::Arc;

use serde::Serialize;

use crate::config::GradingConfig;
use crate::testcase::{DisplayPolicy, TestCase};

pub use compare::Comparator;
pub use sanitize::sanitize;

pub const RUN_ERROR_BANNER: &str = "*** RUN TIME ERROR(S) ***";
pub const NOT_RUN: &str = "*** NOT RUN ***";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    pub expected: String,
    pub got: String,
    pub is_hidden: bool,
    /// The test was never executed: earlier errors stopped testing or the
    /// time budget ran out.
    pub not_run: bool,
}

/// One row per executed test, plus the bookkeeping the mark and the
/// outcome messages are derived from.
#[derive(Debug, Clone)]
pub struct ResultTable {
    cfg: Arc<GradingConfig>,
    comparator: Comparator,
    show_tests: bool,
    show_stdins: bool,
    rows: Vec<ResultRow>,
    mark: f64,
    num_failed: usize,
    hiding: bool,
    failed_hidden: bool,
    aborted: bool,
    missing_tests: usize,
    global_error: Option<String>,
}

impl ResultTable {
    pub fn new(cfg: Arc<GradingConfig>) -> Self {
        Self {
            comparator: Comparator::from_config(&cfg),
            cfg,
            show_tests: false,
            show_stdins: false,
            rows: Vec::new(),
            mark: 0.0,
            num_failed: 0,
            hiding: false,
            failed_hidden: false,
            aborted: false,
            missing_tests: 0,
            global_error: None,
        }
    }

    fn stdin_of<'t>(&self, test: &'t TestCase) -> &'t str {
        if self.cfg.stdin_from_extra() {
            test.extra()
        } else {
            test.stdin()
        }
    }

    /// Shows the test and input columns only if some test uses them.
    pub fn set_header(&mut self, tests: &[TestCase]) {
        self.show_tests = tests.iter().any(|t| !t.code().trim().is_empty());
        self.show_stdins = tests.iter().any(|t| !self.stdin_of(t).trim_end().is_empty());
    }

    pub fn columns(&self) -> Vec<&'static str> {
        let mut cols = Vec::with_capacity(4);
        if self.show_tests {
            cols.push("Test");
        }
        if self.show_stdins {
            cols.push("Input");
        }
        cols.extend(["Expected", "Got"]);
        cols
    }

    fn cell(&self, text: &str) -> String {
        sanitize(text, self.cfg.max_string_length)
    }

    fn base_row(&self, test: &TestCase) -> ResultRow {
        ResultRow {
            is_correct: false,
            test: self.show_tests.then(|| self.cell(test.code())),
            stdin: self.show_stdins.then(|| self.cell(self.stdin_of(test))),
            expected: self.cell(test.expected()),
            got: String::new(),
            is_hidden: false,
            not_run: false,
        }
    }

    /// Records one executed test. `error` is run-time error output, already
    /// remapped to the candidate's line numbers. Returns the correctness.
    pub fn add_row(&mut self, test: &TestCase, got: &str, error: &str) -> bool {
        let is_correct = self
            .comparator
            .matches(test.expected(), &format!("{}{}", got, error));

        let mut shown = self.cell(got.trim_matches('\n'));
        if !error.is_empty() {
            let err = format!("{}\n{}", RUN_ERROR_BANNER, self.cell(error));
            shown = if shown.is_empty() {
                err
            } else {
                format!("{}\n{}", shown, err)
            };
        }

        if is_correct {
            self.mark += test.mark();
        } else {
            self.num_failed += 1;
        }
        let is_hidden = self.hiding || test.display().hides(is_correct);
        if !is_correct && is_hidden {
            self.failed_hidden = true;
        }
        if !is_correct && test.hide_rest_if_fail() {
            self.hiding = true;
        }

        let row = ResultRow {
            is_correct,
            got: shown,
            is_hidden,
            ..self.base_row(test)
        };
        self.rows.push(row);
        is_correct
    }

    /// Records tests that were never executed.
    pub fn tests_missed(&mut self, tests: &[TestCase]) {
        self.missing_tests += tests.len();
        for test in tests {
            let row = ResultRow {
                got: NOT_RUN.to_owned(),
                is_hidden: self.hiding || test.display() == DisplayPolicy::Hide,
                not_run: true,
                ..self.base_row(test)
            };
            self.rows.push(row);
        }
    }

    pub fn record_global_error(&mut self, message: impl Into<String>) {
        self.global_error = Some(message.into());
    }

    pub fn set_aborted(&mut self) {
        self.aborted = true;
    }

    /// Discards every row and flag, keeping the header.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.mark = 0.0;
        self.num_failed = 0;
        self.hiding = false;
        self.failed_hidden = false;
        self.aborted = false;
        self.missing_tests = 0;
        self.global_error = None;
    }

    /// Sum of the marks earned, after the all-or-nothing rule and the hidden
    /// failure scale.
    pub fn mark(&self) -> f64 {
        let cfg = &self.cfg;
        if self.num_failed == 0 && (self.missing_tests == 0 || !cfg.all_or_nothing) {
            return self.mark;
        }
        if cfg.all_or_nothing {
            return 0.0;
        }
        let only_hidden_failed = self
            .rows
            .iter()
            .filter(|r| !r.is_correct && !r.not_run)
            .all(|r| r.is_hidden);
        match cfg.hidden_fail_scale {
            Some(scale) if only_hidden_failed => self.mark * scale,
            _ => self.mark,
        }
    }

    /// [`mark`](Self::mark) as a fraction of `total`. With nothing to earn,
    /// a clean run is worth 1.
    pub fn fraction(&self, total: f64) -> f64 {
        if total > 0.0 {
            (self.mark() / total).clamp(0.0, 1.0)
        } else if self.num_failed == 0 && self.missing_tests == 0 && self.global_error.is_none() {
            1.0
        } else {
            0.0
        }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn num_failed(&self) -> usize {
        self.num_failed
    }

    pub fn failed_hidden(&self) -> bool {
        self.failed_hidden
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn missing_tests(&self) -> usize {
        self.missing_tests
    }

    pub fn global_error(&self) -> Option<&str> {
        self.global_error.as_deref()
    }
}
