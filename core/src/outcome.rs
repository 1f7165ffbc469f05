use serde::Serialize;

use crate::result::{ResultRow, ResultTable};

/// The result of grading one submission, handed back to the host.
///
/// Everything here is plain text; rendering is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub fraction: f64,
    pub columns: Vec<&'static str>,
    pub rows: Vec<ResultRow>,
    pub prologue: String,
    pub epilogue: String,
    pub global_error: Option<String>,
    pub missing_tests: usize,
    pub aborted: bool,
    pub failed_hidden: bool,
}

impl Outcome {
    /// `errors` are the compile, style and pre-run errors collected before
    /// (or instead of) running the tests.
    pub fn assemble(
        fraction: f64,
        errors: &[String],
        is_precheck: bool,
        unknown_keys: &[String],
        table: &ResultTable,
    ) -> Self {
        let mut prologue = Vec::new();
        if is_precheck {
            prologue.push(if fraction >= 1.0 { "Passed" } else { "Failed, as follows." }.to_owned());
            prologue.extend(errors.iter().cloned());
        } else if !errors.is_empty() {
            prologue.push("Pre-run checks failed".to_owned());
            prologue.extend(errors.iter().cloned());
        }
        if !unknown_keys.is_empty() {
            prologue.push(format!(
                "Unexpected config parameter(s): {}",
                unknown_keys.join(", ")
            ));
        }

        let mut epilogue = Vec::new();
        if let Some(err) = table.global_error() {
            epilogue.push(format!("Run Error\n{}", err));
        }
        if table.aborted() {
            epilogue.push("Testing was aborted due to runtime errors.".to_owned());
        }
        if table.missing_tests() != 0 {
            epilogue.push(format!(
                "{} tests not run due to previous errors.",
                table.missing_tests()
            ));
        }
        if table.failed_hidden() {
            epilogue.push("One or more hidden tests failed.".to_owned());
        }

        let rows = table.rows().to_vec();
        Self {
            fraction,
            columns: if rows.is_empty() { Vec::new() } else { table.columns() },
            rows,
            prologue: prologue.join("\n"),
            epilogue: epilogue.join("\n"),
            global_error: table.global_error().map(str::to_owned),
            missing_tests: table.missing_tests(),
            aborted: table.aborted(),
            failed_hidden: table.failed_hidden(),
        }
    }

    pub fn is_perfect(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Rows a student may see.
    pub fn visible_rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter().filter(|r| !r.is_hidden)
    }
}
