//! Compile-then-run backend. Candidates run under `bash -c` with `ulimit`
//! limits in their own process group, output captured to files in the work
//! directory so that the file-size limit also applies to stdout and stderr.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use fsutil::ScopedFile;
use lazy_regex::regex;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use super::{
    effective_limit, CompileMode, CompileResult, RunOutcome, Runner, SandboxError, TerminalState,
};
use crate::clock;
use crate::config::GradingConfig;
use crate::lang::{Language, LineRemapper, Toolchain};
use crate::template;

const SHELL: &str = "bash";
const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);
const STDIN_FILE: &str = "__stdin__.txt";
const STDOUT_FILE: &str = "__stdout__.txt";
const STDERR_FILE: &str = "__stderr__.txt";
const TRUNCATED: &str = "\n*** EXCESSIVE OUTPUT - TRUNCATED ***";

#[derive(Debug)]
pub struct SubprocessRunner {
    language: Language,
    toolchain: Toolchain,
    work_dir: PathBuf,
    memory_limit_kb: u64,
    file_size_limit_kb: u64,
    max_output_bytes: usize,
    allow_positive_return: bool,
    built: bool,
    remapper: LineRemapper,
}

impl SubprocessRunner {
    pub fn new(
        language: Language,
        toolchain: Toolchain,
        cfg: &GradingConfig,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            language,
            toolchain: toolchain.with_config(cfg),
            work_dir,
            memory_limit_kb: cfg.memory_limit_kb,
            file_size_limit_kb: cfg.file_size_limit_kb,
            max_output_bytes: cfg.max_output_bytes,
            allow_positive_return: cfg.allow_positive_return,
            built: false,
            remapper: LineRemapper::new(language, 0),
        }
    }

    pub fn work_dir(&self) -> &std::path::Path {
        &self.work_dir
    }

    fn render(&self, tmpl: &str) -> Result<String, SandboxError> {
        Ok(template::render(tmpl, &self.toolchain.vars(&self.work_dir))?)
    }

    fn build_command(&self, mode: CompileMode) -> Option<&str> {
        match (self.language.is_compiled(), mode) {
            (false, _) => self.toolchain.check.as_deref(),
            (true, CompileMode::Executable) => self.toolchain.compile.as_deref(),
            (true, CompileMode::Object) => self.toolchain.compile_object.as_deref(),
        }
    }

    /// The `ulimit` prefix and the run command. `cpu_secs` must be positive.
    fn limited_command(&self, cpu_secs: u64) -> Result<String, SandboxError> {
        let cmd = self.render(&self.toolchain.run)?;
        Ok(format!(
            "ulimit -s unlimited; ulimit -c 0; ulimit -v {}; ulimit -t {}; ulimit -f {}; {}",
            self.memory_limit_kb, cpu_secs, self.file_size_limit_kb, cmd
        ))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Removes the job-status lines bash prints about its killed children.
fn strip_job_status(stderr: &str) -> String {
    regex!(r"(?m)^(?:\S*bash: )?line \d+: +\d+ [A-Z][^\n]*(?:\n|$)")
        .replace_all(stderr, "")
        .into_owned()
}

fn truncate_output(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text += TRUNCATED;
    text
}

/// Maps how the child ended to a terminal state and the message appended to
/// its stderr.
///
/// `limit_secs` is the CPU limit that was actually imposed and `per_test` the
/// per-test limit it was derived from: running out of a limit smaller than
/// `per_test` means the shared budget ran out, not the test.
pub(crate) fn classify(
    code: i32,
    guard_fired: bool,
    cpu_time: Duration,
    limit_secs: u64,
    per_test: Duration,
    allow_positive_return: bool,
) -> (TerminalState, Option<String>) {
    if code == 0 && !guard_fired {
        return (TerminalState::Normal, None);
    }
    if guard_fired || code > 128 {
        if guard_fired || cpu_time >= Duration::from_secs(limit_secs) {
            return if limit_secs >= per_test.as_secs() {
                (TerminalState::Timeout, Some("*** TIMEOUT ***".to_owned()))
            } else {
                (
                    TerminalState::TimeBudgetExceeded,
                    Some("*** Time budget exceeded ***".to_owned()),
                )
            };
        }
        let sig = code - 128;
        let msg = match sig {
            9 => "*** Killed by timeout or excessive output ***".to_owned(),
            11 => "*** Segmentation Fault ***".to_owned(),
            _ => format!("*** Killed by signal {} ***", sig),
        };
        return (TerminalState::Killed(sig), Some(msg));
    }
    if allow_positive_return {
        return (TerminalState::Normal, None);
    }
    (
        TerminalState::RuntimeError,
        Some(format!("*** Program exited with return code of {} ***", code)),
    )
}

fn append_message(stderr: String, msg: Option<String>) -> String {
    match msg {
        None => stderr,
        Some(msg) if stderr.trim().is_empty() => msg,
        Some(msg) => format!("{}\n{}", stderr.trim_end(), msg),
    }
}

fn kill_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pid, e),
    }
}

#[async_trait]
impl Runner for SubprocessRunner {
    async fn compile(
        &mut self,
        source: &str,
        mode: CompileMode,
        prelude_lines: usize,
    ) -> Result<CompileResult, SandboxError> {
        self.built = false;
        self.remapper = LineRemapper::new(self.language, prelude_lines);
        fsutil::write_with_mkdir(self.work_dir.join(&self.toolchain.source_file), source)?;

        let Some(tmpl) = self.build_command(mode) else {
            self.built = mode == CompileMode::Executable;
            return Ok(CompileResult::ok());
        };
        let cmd = self.render(tmpl)?;
        log::debug!("compile: {}", cmd);

        let child = Command::new(SHELL)
            .args(["-c", &cmd])
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(cmd.clone(), e))?;

        let output = match tokio::time::timeout(COMPILE_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output.map_err(SandboxError::Wait)?,
            Err(_) => {
                return Ok(CompileResult::failed(format!(
                    "Compilation timed out after {} seconds",
                    COMPILE_TIMEOUT.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let mut text = fsutil::escape_invalid_utf8(&output.stdout);
            text += &fsutil::escape_invalid_utf8(&output.stderr);
            return Ok(CompileResult::failed(self.remapper.remap(&text)));
        }
        self.built = mode == CompileMode::Executable;
        Ok(CompileResult::ok())
    }

    async fn run_one(
        &mut self,
        stdin: &str,
        remaining: Duration,
        per_test: Duration,
    ) -> Result<RunOutcome, SandboxError> {
        if !self.built {
            return Err(SandboxError::NotBuilt);
        }
        let (limit, _) = effective_limit(remaining, per_test);
        let limit_secs = limit.as_secs();
        if limit_secs == 0 {
            return Ok(RunOutcome::budget_exhausted());
        }
        let cmd = self.limited_command(limit_secs)?;

        let stdin_file = ScopedFile::with_contents(self.work_dir.join(STDIN_FILE), stdin)?;
        let stdin_handle = fsutil::open_file(stdin_file.path())?;
        let (stdout_file, out) = ScopedFile::create(self.work_dir.join(STDOUT_FILE))?;
        let (stderr_file, err) = ScopedFile::create(self.work_dir.join(STDERR_FILE))?;

        let cpu_before = clock::children_cpu_time()?;
        let mut child = Command::new(SHELL)
            .args(["-c", &cmd])
            .current_dir(&self.work_dir)
            .stdin(Stdio::from(stdin_handle))
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(cmd.clone(), e))?;
        let pid = child.id();

        let guard = limit * 3 + Duration::from_secs(2);
        let (status, guard_fired) = match tokio::time::timeout(guard, child.wait()).await {
            Ok(status) => (status.map_err(SandboxError::Wait)?, false),
            Err(_) => {
                log::warn!("wall-clock guard of {:?} expired, killing the run", guard);
                // The group id is only safe to signal while the leader is unreaped.
                kill_group(pid);
                (child.wait().await.map_err(SandboxError::Wait)?, true)
            }
        };
        let cpu_time = clock::children_cpu_time()?.saturating_sub(cpu_before);

        let code = exit_code(status);
        let (state, msg) = classify(
            code,
            guard_fired,
            cpu_time,
            limit_secs,
            per_test,
            self.allow_positive_return,
        );
        log::debug!("run finished: code={} state={} cpu={:?}", code, state, cpu_time);

        let stdout = truncate_output(stdout_file.read()?, self.max_output_bytes);
        let stderr = self.remapper.remap(&strip_job_status(&stderr_file.read()?));
        let stderr = append_message(stderr, msg);
        drop(stdin_file);
        Ok(RunOutcome {
            stdout,
            stderr,
            state,
            cpu_time,
        })
    }
}
