pub mod inprocess;
pub mod policy;
pub mod python;
pub mod subprocess;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GradingConfig;
use crate::lang::{Language, Toolchain};
use crate::template::TemplateError;

pub use inprocess::{ExecContext, ExecError, InProcessRunner, Interpreter};
pub use policy::{AttrAccess, SandboxPolicy};
pub use python::PythonEngine;
pub use subprocess::SubprocessRunner;

/// Infrastructure failures of a backend. Nothing the candidate does can
/// produce one of these; they abort grading as host errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Cannot spawn '{0}': {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("Cannot wait for child process: {0}")]
    Wait(#[source] std::io::Error),

    #[error(transparent)]
    Capture(#[from] fsutil::Error),

    #[error("Bad command template: {0}")]
    Template(#[from] TemplateError),

    #[error("Cannot read CPU clock: {0}")]
    Clock(#[source] nix::Error),

    #[error("Interpreter failure: {0}")]
    Engine(String),

    #[error("run_one called before a successful executable build")]
    NotBuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Build something that can be run.
    Executable,
    /// Check that the candidate compiles without linking it.
    Object,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileResult {
    pub error: Option<String>,
}

impl CompileResult {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            error: Some(text.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TerminalState {
    Normal,
    RuntimeError,
    Timeout,
    TimeBudgetExceeded,
    Killed(i32),
}

impl TerminalState {
    pub fn is_normal(self) -> bool {
        self == Self::Normal
    }

    pub fn is_time_exhausted(self) -> bool {
        matches!(self, Self::Timeout | Self::TimeBudgetExceeded)
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::RuntimeError => write!(f, "RUNTIME_ERROR"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::TimeBudgetExceeded => write!(f, "TIME_BUDGET_EXCEEDED"),
            Self::Killed(sig) => write!(f, "KILLED({})", sig),
        }
    }
}

/// Result of one execution. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub state: TerminalState,
    pub cpu_time: Duration,
}

impl RunOutcome {
    pub fn budget_exhausted() -> Self {
        Self {
            stdout: String::new(),
            stderr: "*** Time budget exceeded ***".to_owned(),
            state: TerminalState::TimeBudgetExceeded,
            cpu_time: Duration::ZERO,
        }
    }
}

/// Which time limit bounds a run. The smaller of the two wins; a tie counts
/// as the per-test limit.
pub fn effective_limit(remaining: Duration, per_test: Duration) -> (Duration, bool) {
    if per_test <= remaining {
        (per_test, true)
    } else {
        (remaining, false)
    }
}

/// The contract shared by both backends.
#[async_trait]
pub trait Runner: Send {
    /// Prepares `source` for [`run_one`](Runner::run_one). Interpreted
    /// languages only check the syntax. `prelude_lines` is subtracted from
    /// line numbers in diagnostics.
    async fn compile(
        &mut self,
        source: &str,
        mode: CompileMode,
        prelude_lines: usize,
    ) -> Result<CompileResult, SandboxError>;

    /// Runs the last successfully built program once. The effective limit is
    /// `min(remaining, per_test)`; a non-positive limit yields
    /// `TimeBudgetExceeded` without running anything.
    async fn run_one(
        &mut self,
        stdin: &str,
        remaining: Duration,
        per_test: Duration,
    ) -> Result<RunOutcome, SandboxError>;
}

/// Backend selection, resolved once per session.
#[derive(Clone)]
pub enum Backend {
    Subprocess,
    InProcess(Arc<dyn Interpreter>),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subprocess => write!(f, "Subprocess"),
            Self::InProcess(_) => write!(f, "InProcess"),
        }
    }
}

impl Backend {
    pub fn create_runner(
        &self,
        language: Language,
        toolchain: &Toolchain,
        cfg: &GradingConfig,
        work_dir: PathBuf,
    ) -> Box<dyn Runner> {
        match self {
            Self::Subprocess => Box::new(SubprocessRunner::new(
                language,
                toolchain.clone(),
                cfg,
                work_dir,
            )),
            Self::InProcess(engine) => Box::new(InProcessRunner::new(
                language,
                Arc::clone(engine),
                SandboxPolicy::from_config(cfg),
            )),
        }
    }
}
