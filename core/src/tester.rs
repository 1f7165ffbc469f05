//! The grading pipeline for one submission: filter the tests, trial compile,
//! style check, then run everything as one combined program or test by test.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lazy_regex::regex;

use crate::clock::TimeBudget;
use crate::config::{GradingConfig, PrecheckPolicy};
use crate::error::{GradeError, Result};
use crate::lang::{Language, ProgramBuilder, Toolchain};
use crate::outcome::Outcome;
use crate::result::ResultTable;
use crate::sandbox::{Backend, CompileMode, RunOutcome, Runner, TerminalState};
use crate::style::{analyse, StyleChecker};
use crate::testcase::{TestCase, TestKind};

pub const TIMEOUT_MESSAGE: &str = "A timeout occurred when running the whole test suite as a single program.
This is usually due to an endless loop in your code but can also arise if your code is very inefficient
and the accumulated time over all tests is excessive. Please ask a tutor or your lecturer if you need help
with making your program more efficient.";

const PASSIVE_OUTPUT: &str = "Your code was not expected to generate any output when executed stand-alone.
Did you accidentally include your test code?";

/// CPU time held back from the total budget for compiling and style checks
/// that run outside any test.
const FREEBOARD: Duration = Duration::from_secs(2);

const ILLEGAL_MAIN: &str = "Illegal call to main().
main should not take any parameters and should not return anything.";

/// Everything that stays fixed while grading: policy, language, toolchain,
/// backend and scratch directory.
#[derive(Debug, Clone)]
pub struct GradingSession {
    pub cfg: Arc<GradingConfig>,
    pub language: Language,
    pub toolchain: Toolchain,
    pub backend: Backend,
    pub work_dir: PathBuf,
}

impl GradingSession {
    pub fn new(language: Language, cfg: GradingConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            language,
            toolchain: language.default_toolchain(),
            backend: Backend::Subprocess,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_toolchain(mut self, toolchain: Toolchain) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn runner(&self) -> Box<dyn Runner> {
        self.backend.create_runner(
            self.language,
            &self.toolchain,
            &self.cfg,
            self.work_dir.clone(),
        )
    }
}

/// What the host hands in for one grading request.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub answer: String,
    pub tests: Vec<TestCase>,
    pub is_precheck: bool,
}

/// The tests that take part in a run.
pub fn filter_tests(tests: Vec<TestCase>, is_precheck: bool, policy: PrecheckPolicy) -> Vec<TestCase> {
    if !is_precheck {
        return tests
            .into_iter()
            .filter(|t| t.kind() != TestKind::PrecheckOnly)
            .collect();
    }
    match policy {
        PrecheckPolicy::Disabled | PrecheckPolicy::Empty => Vec::new(),
        PrecheckPolicy::Examples => tests.into_iter().filter(TestCase::is_example).collect(),
        PrecheckPolicy::Selected => tests
            .into_iter()
            .filter(|t| t.kind() != TestKind::Normal)
            .collect(),
        PrecheckPolicy::All => tests,
    }
}

pub struct Tester<'s> {
    session: &'s GradingSession,
    program: ProgramBuilder,
    tests: Vec<TestCase>,
    is_precheck: bool,
    runner: Box<dyn Runner>,
    table: ResultTable,
    /// Source of the executable the runner currently holds.
    built: Option<String>,
    /// Started when grading starts; everything after that, compiling
    /// included, draws on it.
    budget: Option<TimeBudget>,
    run_errors: usize,
}

impl<'s> Tester<'s> {
    pub fn new(session: &'s GradingSession, submission: Submission) -> Self {
        let tests = filter_tests(
            submission.tests,
            submission.is_precheck,
            session.cfg.precheck_policy,
        );
        Self::with_tests(session, &submission.answer, tests, submission.is_precheck)
    }

    fn with_tests(
        session: &'s GradingSession,
        answer: &str,
        tests: Vec<TestCase>,
        is_precheck: bool,
    ) -> Self {
        let mut table = ResultTable::new(Arc::clone(&session.cfg));
        table.set_header(&tests);
        Self {
            session,
            program: ProgramBuilder::new(session.language, Arc::clone(&session.cfg), answer),
            tests,
            is_precheck,
            runner: session.runner(),
            table,
            built: None,
            budget: None,
            run_errors: 0,
        }
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    /// Runs `author_answer` over the tests, without style checks, and uses its
    /// output as the expected output of every test that has none.
    pub async fn with_author_answer(mut self, author_answer: &str) -> Result<Self> {
        if self.tests.iter().all(|t| !t.expected().trim().is_empty()) {
            return Ok(self);
        }
        let mut session = self.session.clone();
        session.cfg = Arc::new(GradingConfig {
            no_style_checks: true,
            ..(*self.session.cfg).clone()
        });

        let mut author = Tester::with_tests(&session, author_answer, self.tests.clone(), false);
        let (_, errors) = author.grade().await?;
        let table = &author.table;
        if !errors.is_empty()
            || author.run_errors > 0
            || table.missing_tests() > 0
            || table.global_error().is_some()
        {
            let mut detail = errors;
            detail.extend(table.global_error().map(str::to_owned));
            detail.extend(
                table
                    .rows()
                    .iter()
                    .filter(|r| r.not_run || r.got.contains(crate::result::RUN_ERROR_BANNER))
                    .map(|r| r.got.clone()),
            );
            return Err(GradeError::BadTestData(format!(
                "error in question's sample answer\n{}",
                detail.join("\n")
            )));
        }

        let filled = self
            .tests
            .iter()
            .zip(table.rows())
            .map(|(test, row)| {
                if test.expected().trim().is_empty() {
                    test.clone().with_expected(row.got.clone())
                } else {
                    test.clone()
                }
            })
            .collect();
        log::debug!("expected output filled in from the author's answer");
        self.tests = filled;
        Ok(self)
    }

    /// Grades the submission.
    pub async fn test_code(mut self) -> Result<Outcome> {
        let (fraction, errors) = self.grade().await?;
        Ok(Outcome::assemble(
            fraction,
            &errors,
            self.is_precheck,
            &self.session.cfg.unknown_keys,
            &self.table,
        ))
    }

    /// The fraction earned plus any errors that stopped or preceded testing.
    async fn grade(&mut self) -> Result<(f64, Vec<String>)> {
        let cfg = Arc::clone(&self.session.cfg);
        self.budget = Some(TimeBudget::start(self.total_budget())?);

        let errors = self.strip_main();
        if !errors.is_empty() {
            return Ok((0.0, errors));
        }

        log::debug!("trial compile");
        if let Some(err) = self.trial_compile().await? {
            return Ok((0.0, vec![err]));
        }

        let mut errors = Vec::new();
        if !cfg.no_style_checks {
            log::debug!("style check");
            errors = self.style_errors().await?;
            if !errors.is_empty() && !(self.is_precheck && cfg.lenient_precheck) {
                return Ok((0.0, errors));
            }
        }

        if self.is_precheck && cfg.precheck_policy <= PrecheckPolicy::Empty {
            return Ok((1.0, errors));
        }

        if let Some(err) = self.run_all_tests().await? {
            errors.push(err);
            return Ok((0.0, errors));
        }
        let total = self.tests.iter().map(TestCase::mark).sum::<f64>();
        Ok((self.table.fraction(total), errors))
    }

    /// Neutralises top-level calls of `main()` when the policy asks for it.
    fn strip_main(&mut self) -> Vec<String> {
        let cfg = &self.session.cfg;
        if !(cfg.strip_main || cfg.strip_main_if_present) || !self.program.language().has_syntax_walker() {
            return Vec::new();
        }
        // Unparseable code is left for the compiler and style checks to report.
        let Ok(analysis) = analyse(self.program.answer()) else {
            return Vec::new();
        };
        let calls = analysis.call_sites("main");
        if calls.is_empty() {
            return if cfg.strip_main {
                vec!["No call to main() found".to_owned()]
            } else {
                Vec::new()
            };
        }

        let mut lines = self.program.answer().split('\n').map(str::to_owned).collect::<Vec<_>>();
        let mut errors = Vec::new();
        let mut seen = BTreeSet::new();
        for &(line, depth) in calls {
            if !seen.insert(line) {
                continue;
            }
            let Some(text) = lines.get_mut(line) else {
                continue;
            };
            if depth > 0 {
                *text += "  # We've let you call main here.";
            } else if regex!(r"^ *main\(\)").is_match(text) {
                *text = text.replacen("main", "pass   # Disabled call to main", 1);
            } else {
                errors.push(ILLEGAL_MAIN.to_owned());
            }
        }
        let answer = lines.join("\n");
        self.program = self.program.clone().with_answer(&answer);
        errors
    }

    fn per_test(&self) -> Duration {
        Duration::from_secs(self.session.cfg.timeout)
    }

    fn total_budget(&self) -> Duration {
        Duration::from_secs(self.session.cfg.total_timeout).saturating_sub(FREEBOARD)
    }

    /// CPU time left for running tests.
    fn remaining(&self) -> Result<Duration> {
        match &self.budget {
            Some(budget) => Ok(budget.remaining()?),
            None => Ok(self.total_budget()),
        }
    }

    /// Compiles `source` unless the runner already holds it. Returns the
    /// compiler's complaint on failure.
    async fn build(&mut self, source: String, mode: CompileMode) -> Result<Option<String>> {
        if mode == CompileMode::Executable && self.built.as_deref() == Some(source.as_str()) {
            return Ok(None);
        }
        self.built = None;
        let res = self
            .runner
            .compile(&source, mode, self.program.prelude_lines())
            .await?;
        match res.error {
            Some(err) => Ok(Some(format!("COMPILE ERROR\n{}", err.trim_end()))),
            None => {
                if mode == CompileMode::Executable {
                    self.built = Some(source);
                }
                Ok(None)
            }
        }
    }

    async fn trial_compile(&mut self) -> Result<Option<String>> {
        if self.program.can_combine(&self.tests) {
            let source = self.program.combined(&self.tests);
            self.build(source, CompileMode::Executable).await
        } else {
            let source = self.program.candidate();
            let mode = self.program.candidate_mode();
            self.build(source, mode).await
        }
    }

    async fn style_errors(&mut self) -> Result<Vec<String>> {
        let session = self.session;
        let cfg = &session.cfg;
        let checker = StyleChecker::new(session.language, cfg, &session.work_dir);
        let mut errors = checker
            .check(self.program.prelude(), self.program.answer())
            .await?;

        if errors.is_empty()
            && cfg.warn_if_passive_output
            && cfg.is_function
            && !session.language.is_compiled()
            && matches!(self.passive_output().await?, Some(out) if !out.is_empty())
        {
            errors.push(PASSIVE_OUTPUT.to_owned());
        }
        Ok(errors)
    }

    /// Output of the candidate run on its own, with no test code. `None` when
    /// the candidate does not build by itself.
    async fn passive_output(&mut self) -> Result<Option<String>> {
        if let Some(err) = self.build(self.program.candidate(), CompileMode::Executable).await? {
            log::debug!("candidate alone does not build: {}", err);
            return Ok(None);
        }
        let out = self
            .runner
            .run_one("", self.remaining()?, self.per_test())
            .await?;
        Ok(Some(format!("{}\n{}", out.stdout, out.stderr).trim().to_owned()))
    }

    /// Fills the result table. Returns a fatal error when a test program
    /// fails to compile.
    async fn run_all_tests(&mut self) -> Result<Option<String>> {
        if self.program.can_combine(&self.tests) {
            if let Some(err) = self
                .build(self.program.combined(&self.tests), CompileMode::Executable)
                .await?
            {
                return Ok(Some(err));
            }
            if self.run_combined().await? {
                return Ok(None);
            }
            log::debug!("combined run unusable, falling back to one run per test");
            self.table.reset();
            self.run_errors = 0;
        }
        self.run_singly().await
    }

    /// Runs all tests as one program. Returns false when the output cannot be
    /// attributed to tests reliably.
    async fn run_combined(&mut self) -> Result<bool> {
        let out = self
            .runner
            .run_one("", self.remaining()?, self.per_test())
            .await?;
        log::debug!("combined run finished: {}", out.state);

        let outputs = self.program.split_output(&out.stdout);
        let errors = self.program.split_output(&out.stderr);
        let n = self.tests.len();
        let exhausted = out.state.is_time_exhausted();
        let usable = outputs.len() == errors.len()
            && (outputs.len() == n || (exhausted && outputs.len() < n));
        if !usable {
            log::debug!(
                "combined run gave {} stdout and {} stderr segments for {} tests",
                outputs.len(),
                errors.len(),
                n
            );
            return Ok(false);
        }

        let tests = self.tests.clone();
        for (test, (output, error)) in tests.iter().zip(outputs.iter().zip(&errors)) {
            let error = error.trim_end();
            if !error.is_empty() {
                self.run_errors += 1;
            }
            self.table.add_row(test, output, error);
        }
        if outputs.len() < n {
            self.table.tests_missed(&tests[outputs.len()..]);
        }
        if exhausted {
            self.table.record_global_error(TIMEOUT_MESSAGE);
        }
        Ok(true)
    }

    async fn run_singly(&mut self) -> Result<Option<String>> {
        let tests = self.tests.clone();
        for (i, test) in tests.iter().enumerate() {
            if let Some(err) = self
                .build(self.program.single(test), CompileMode::Executable)
                .await?
            {
                return Ok(Some(err));
            }
            let out = self
                .runner
                .run_one(self.program.stdin_for(test), self.remaining()?, self.per_test())
                .await?;
            log::debug!("test {} finished: {}", i + 1, out.state);

            let error = out.stderr.trim_end();
            if out.state == TerminalState::TimeBudgetExceeded {
                self.table.record_global_error(format!(
                    "The total time allowed for testing ({} seconds) ran out.",
                    self.session.cfg.total_timeout
                ));
                // A test the budget never reached has no row of its own.
                if out == RunOutcome::budget_exhausted() {
                    self.table.tests_missed(&tests[i..]);
                } else {
                    self.table.add_row(test, &out.stdout, error);
                    self.table.tests_missed(&tests[i + 1..]);
                }
                break;
            }

            self.table.add_row(test, &out.stdout, error);
            if !error.is_empty() {
                self.run_errors += 1;
                if self.session.cfg.abort_on_error && i + 1 < tests.len() {
                    self.table.set_aborted();
                    self.table.tests_missed(&tests[i + 1..]);
                    break;
                }
            }
        }
        Ok(None)
    }
}
