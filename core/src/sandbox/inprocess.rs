//! In-process backend: candidate code runs inside an embedded interpreter on
//! a blocking worker thread, bounded by a [`Watchdog`].
//!
//! The interpreter itself is pluggable. Everything it may do to the outside
//! world goes through the [`ExecContext`] it is handed, which enforces the
//! session's [`SandboxPolicy`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    effective_limit, AttrAccess, CompileMode, CompileResult, RunOutcome, Runner, SandboxError,
    SandboxPolicy, TerminalState,
};
use crate::clock;
use crate::lang::{Language, LineRemapper};
use crate::watchdog::{CancelToken, Watchdog};

/// Extra wall-clock time given to an engine after cancellation before it is
/// abandoned.
const GRACE: Duration = Duration::from_secs(1);

/// Conditions that end an in-process execution early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error("execution cancelled")]
    Cancelled,

    #[error("excessive output")]
    ExcessiveOutput,

    #[error("Invalid Action: {0}")]
    InvalidAction(String),

    #[error("'input' function called when no input data available.")]
    OutOfInput,

    /// An uncaught exception of the candidate, already formatted.
    #[error("{traceback}")]
    Raised { traceback: String },

    #[error("Unexpected termination: Please do not call exit() or quit().")]
    Exit,

    /// The engine itself broke down. Reported as a host error.
    #[error("{0}")]
    Engine(String),
}

/// An embedded interpreter.
pub trait Interpreter: Send + Sync {
    fn check_syntax(&self, source: &str) -> Result<(), String>;

    /// Runs `source` to completion. Implementations must call
    /// [`ExecContext::checkpoint`] regularly so that cancellation is prompt.
    fn execute(&self, source: &str, ctx: &mut ExecContext) -> Result<(), ExecError>;
}

#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: String,
    stderr: String,
    cap: usize,
}

impl CapturedOutput {
    fn push(&mut self, to_stderr: bool, text: &str) -> Result<(), ExecError> {
        if self.stdout.len() + self.stderr.len() + text.len() > self.cap {
            return Err(ExecError::ExcessiveOutput);
        }
        if to_stderr {
            self.stderr += text;
        } else {
            self.stdout += text;
        }
        Ok(())
    }
}

/// Everything an engine can reach during one execution.
///
/// Output lives behind a shared handle so that whatever was written before a
/// cancellation or abandonment is still reported.
#[derive(Debug)]
pub struct ExecContext {
    stdin: VecDeque<String>,
    output: Arc<Mutex<CapturedOutput>>,
    policy: Arc<SandboxPolicy>,
    token: CancelToken,
}

impl ExecContext {
    fn new(stdin: &str, policy: Arc<SandboxPolicy>, token: CancelToken) -> Self {
        let output = CapturedOutput {
            cap: policy.max_output_bytes,
            ..Default::default()
        };
        Self {
            stdin: stdin.lines().map(str::to_owned).collect(),
            output: Arc::new(Mutex::new(output)),
            policy,
            token,
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Next line of standard input without its newline.
    pub fn read_line(&mut self) -> Result<String, ExecError> {
        self.try_read_line()?.ok_or(ExecError::OutOfInput)
    }

    /// Like [`read_line`](Self::read_line) but `None` at end of input.
    pub fn try_read_line(&mut self) -> Result<Option<String>, ExecError> {
        let Some(line) = self.stdin.pop_front() else {
            return Ok(None);
        };
        if self.policy.echo_input {
            self.write_stdout(&format!("{}\n", line))?;
        }
        Ok(Some(line))
    }

    pub fn write_stdout(&self, text: &str) -> Result<(), ExecError> {
        self.write(false, text)
    }

    pub fn write_stderr(&self, text: &str) -> Result<(), ExecError> {
        self.write(true, text)
    }

    fn write(&self, to_stderr: bool, text: &str) -> Result<(), ExecError> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(to_stderr, text)
    }

    pub fn open_file(&self, name: &str) -> Result<(), ExecError> {
        if self.policy.may_open(name) {
            Ok(())
        } else {
            Err(ExecError::InvalidAction(format!(
                "You are not allowed to open '{}'.",
                name
            )))
        }
    }

    /// How `module.attr` is bound when the candidate imports `module`.
    pub fn import_attr(&self, module: &str, attr: &str, callable: bool) -> AttrAccess {
        self.policy.attr_access(module, attr, callable)
    }

    /// Called before a built-in runs. Stubs of proscribed built-ins and of
    /// disallowed module callables fail here.
    pub fn call_builtin(&self, name: &str) -> Result<(), ExecError> {
        if self.policy.is_proscribed_builtin(name) {
            Err(ExecError::InvalidAction(format!(
                "You are not allowed to use '{}'!",
                name
            )))
        } else {
            Ok(())
        }
    }

    /// Called before a stubbed or hidden module attribute is used.
    pub fn call_attr(&self, module: &str, attr: &str) -> Result<(), ExecError> {
        match self.policy.attr_access(module, attr, true) {
            AttrAccess::Allowed => Ok(()),
            AttrAccess::Stub | AttrAccess::Hidden => Err(ExecError::InvalidAction(format!(
                "You are not allowed to use '{}.{}'!",
                module, attr
            ))),
        }
    }

    pub fn checkpoint(&self) -> Result<(), ExecError> {
        if self.token.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct InProcessRunner {
    language: Language,
    engine: Arc<dyn Interpreter>,
    policy: Arc<SandboxPolicy>,
    source: Option<Arc<str>>,
    remapper: LineRemapper,
}

impl InProcessRunner {
    pub fn new(language: Language, engine: Arc<dyn Interpreter>, policy: SandboxPolicy) -> Self {
        Self {
            language,
            engine,
            policy: Arc::new(policy),
            source: None,
            remapper: LineRemapper::new(language, 0),
        }
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    *buf += line;
    buf.push('\n');
}

#[async_trait]
impl Runner for InProcessRunner {
    async fn compile(
        &mut self,
        source: &str,
        _mode: CompileMode,
        prelude_lines: usize,
    ) -> Result<CompileResult, SandboxError> {
        self.remapper = LineRemapper::new(self.language, prelude_lines);
        let engine = Arc::clone(&self.engine);
        let owned = source.to_owned();
        let checked = tokio::task::spawn_blocking(move || engine.check_syntax(&owned))
            .await
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
        match checked {
            Ok(()) => {
                self.source = Some(Arc::from(source));
                Ok(CompileResult::ok())
            }
            Err(msg) => {
                self.source = None;
                Ok(CompileResult::failed(self.remapper.remap(&msg)))
            }
        }
    }

    async fn run_one(
        &mut self,
        stdin: &str,
        remaining: Duration,
        per_test: Duration,
    ) -> Result<RunOutcome, SandboxError> {
        let source = self.source.clone().ok_or(SandboxError::NotBuilt)?;
        let (limit, per_test_binding) = effective_limit(remaining, per_test);
        if limit.is_zero() {
            return Ok(RunOutcome::budget_exhausted());
        }

        let cpu_before = clock::process_tree_cpu_time()?;
        let token = CancelToken::new();
        let mut dog = Watchdog::arm(limit, token.clone());
        let mut ctx = ExecContext::new(stdin, Arc::clone(&self.policy), token);
        let output = Arc::clone(&ctx.output);

        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || engine.execute(&source, &mut ctx));
        let result = match tokio::time::timeout(limit + GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(SandboxError::Engine(e.to_string())),
            Err(_) => {
                log::warn!("engine ignored cancellation for {:?}; abandoning it", GRACE);
                Err(ExecError::Cancelled)
            }
        };
        dog.disarm();
        let cpu_time = clock::process_tree_cpu_time()?.saturating_sub(cpu_before);

        let (mut stdout, mut stderr) = {
            let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
            (std::mem::take(&mut out.stdout), std::mem::take(&mut out.stderr))
        };
        let state = match result {
            Err(ExecError::Engine(msg)) => return Err(SandboxError::Engine(msg)),
            Ok(()) => TerminalState::Normal,
            Err(ExecError::Cancelled) => {
                append_line(&mut stderr, "Time limit exceeded");
                if per_test_binding {
                    TerminalState::Timeout
                } else {
                    TerminalState::TimeBudgetExceeded
                }
            }
            Err(ExecError::ExcessiveOutput) => {
                stdout.clear();
                stderr = "=== Excessive Output ===\n    Infinite loop?".to_owned();
                TerminalState::RuntimeError
            }
            Err(ExecError::Raised { traceback }) => {
                append_line(&mut stderr, self.remapper.remap(&traceback).trim_end());
                TerminalState::RuntimeError
            }
            Err(e) => {
                append_line(&mut stderr, &e.to_string());
                TerminalState::RuntimeError
            }
        };
        log::debug!("in-process run finished: state={} cpu={:?}", state, cpu_time);

        Ok(RunOutcome {
            stdout,
            stderr,
            state,
            cpu_time,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::GradingConfig;

    /// A tiny line-oriented engine. Each line of the source is one
    /// instruction.
    struct Scripted;

    impl Interpreter for Scripted {
        fn check_syntax(&self, source: &str) -> Result<(), String> {
            for (i, line) in source.lines().enumerate() {
                if line.starts_with("??") {
                    return Err(format!("  File \"prog.py\", line {}\nSyntaxError: invalid syntax", i + 1));
                }
            }
            Ok(())
        }

        fn execute(&self, source: &str, ctx: &mut ExecContext) -> Result<(), ExecError> {
            for (i, line) in source.lines().enumerate() {
                ctx.checkpoint()?;
                let (op, arg) = line.split_once(' ').unwrap_or((line, ""));
                match op {
                    "print" => ctx.write_stdout(&format!("{}\n", arg))?,
                    "warn" => ctx.write_stderr(&format!("{}\n", arg))?,
                    "echo" => {
                        let s = ctx.read_line()?;
                        ctx.write_stdout(&format!("got {}\n", s))?;
                    }
                    "open" => ctx.open_file(arg)?,
                    "call" => ctx.call_builtin(arg)?,
                    "attr" => {
                        let (module, attr) = arg.split_once('.').unwrap_or((arg, ""));
                        ctx.call_attr(module, attr)?
                    }
                    "slurp" => {
                        while let Some(s) = ctx.try_read_line()? {
                            ctx.write_stderr(&format!("{}\n", s))?;
                        }
                    }
                    "spam" => loop {
                        ctx.write_stdout("spam spam spam\n")?;
                    },
                    "spin" => loop {
                        ctx.checkpoint()?;
                        std::thread::sleep(Duration::from_millis(5));
                    },
                    "hang" => std::thread::sleep(Duration::from_secs(4)),
                    "raise" => {
                        return Err(ExecError::Raised {
                            traceback: format!(
                                "Traceback (most recent call last):\n  File \"prog.py\", line {}, in <module>\nValueError: {}",
                                i + 1,
                                arg
                            ),
                        })
                    }
                    "exit" => return Err(ExecError::Exit),
                    _ => {}
                }
            }
            Ok(())
        }
    }

    fn runner(cfg: &GradingConfig) -> InProcessRunner {
        InProcessRunner::new(
            Language::Python3,
            Arc::new(Scripted),
            SandboxPolicy::from_config(cfg),
        )
    }

    async fn run(src: &str, stdin: &str, remaining: Duration, per_test: Duration) -> RunOutcome {
        let mut r = runner(&GradingConfig::default());
        assert!(r.compile(src, CompileMode::Executable, 0).await.unwrap().is_ok());
        r.run_one(stdin, remaining, per_test).await.unwrap()
    }

    const SECS: fn(u64) -> Duration = Duration::from_secs;

    #[tokio::test]
    async fn normal_run_with_echoed_input() {
        let out = run("print hi\necho\nwarn careful", "42\n", SECS(50), SECS(5)).await;
        assert_eq!(out.state, TerminalState::Normal);
        assert_eq!(out.stdout, "hi\n42\ngot 42\n");
        assert_eq!(out.stderr, "careful\n");
    }

    #[tokio::test]
    async fn out_of_input() {
        let out = run("print a\necho", "", SECS(50), SECS(5)).await;
        assert_eq!(out.state, TerminalState::RuntimeError);
        assert_eq!(out.stdout, "a\n");
        assert_eq!(
            out.stderr,
            "'input' function called when no input data available.\n"
        );
    }

    #[tokio::test]
    async fn reading_to_end_of_input_is_not_an_error() {
        let out = run("slurp\nprint done", "a\nb\n", SECS(50), SECS(5)).await;
        assert_eq!(out.state, TerminalState::Normal);
        assert_eq!(out.stdout, "a\nb\ndone\n");
        assert_eq!(out.stderr, "a\nb\n");
    }

    #[tokio::test]
    async fn per_test_limit_gives_timeout_and_keeps_output() {
        let out = run("print started\nspin", "", SECS(50), Duration::from_millis(100)).await;
        assert_eq!(out.state, TerminalState::Timeout);
        assert_eq!(out.stdout, "started\n");
        assert_eq!(out.stderr, "Time limit exceeded\n");
    }

    #[tokio::test]
    async fn budget_limit_gives_budget_exceeded() {
        let out = run("spin", "", Duration::from_millis(100), SECS(5)).await;
        assert_eq!(out.state, TerminalState::TimeBudgetExceeded);
    }

    #[tokio::test]
    async fn zero_budget_runs_nothing() {
        let out = run("print x", "", Duration::ZERO, SECS(5)).await;
        assert_eq!(out, RunOutcome::budget_exhausted());
    }

    #[tokio::test]
    async fn engine_that_never_checks_is_abandoned() {
        let out = run("print before\nhang", "", SECS(50), Duration::from_millis(200)).await;
        assert_eq!(out.state, TerminalState::Timeout);
        assert_eq!(out.stdout, "before\n");
    }

    #[tokio::test]
    async fn excessive_output_is_fatal() {
        let out = run("spam", "", SECS(50), SECS(5)).await;
        assert_eq!(out.state, TerminalState::RuntimeError);
        assert_eq!(out.stdout, "");
        assert_eq!(out.stderr, "=== Excessive Output ===\n    Infinite loop?");
    }

    #[tokio::test]
    async fn policy_violations() {
        let out = run("open data.txt\nopen prog.py", "", SECS(50), SECS(5)).await;
        assert_eq!(
            out.stderr,
            "Invalid Action: You are not allowed to open 'prog.py'.\n"
        );
        let out = run("call len\ncall eval", "", SECS(50), SECS(5)).await;
        assert_eq!(out.stderr, "Invalid Action: You are not allowed to use 'eval'!\n");
        let out = run("attr math.sqrt\nattr os.system", "", SECS(50), SECS(5)).await;
        assert_eq!(out.stderr, "Invalid Action: You are not allowed to use 'os.system'!\n");
        let out = run("exit", "", SECS(50), SECS(5)).await;
        assert_eq!(
            out.stderr,
            "Unexpected termination: Please do not call exit() or quit().\n"
        );
    }

    #[tokio::test]
    async fn tracebacks_and_syntax_errors_are_remapped() {
        let mut r = runner(&GradingConfig::default());
        let res = r
            .compile("import x\nprint 1\n?? oops", CompileMode::Executable, 1)
            .await
            .unwrap();
        assert_eq!(
            res.error.as_deref(),
            Some("  File \"prog.py\", line 2\nSyntaxError: invalid syntax")
        );
        assert!(matches!(
            r.run_one("", SECS(50), SECS(5)).await,
            Err(SandboxError::NotBuilt)
        ));

        r.compile("import x\nprint 1\nraise bad", CompileMode::Executable, 1)
            .await
            .unwrap();
        let out = r.run_one("", SECS(50), SECS(5)).await.unwrap();
        assert_eq!(out.state, TerminalState::RuntimeError);
        assert_eq!(out.stdout, "1\n");
        assert!(out.stderr.contains("line 2, in <module>"), "{}", out.stderr);
        assert!(out.stderr.ends_with("ValueError: bad\n"));
    }
}
