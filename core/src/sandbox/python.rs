//! An [`Interpreter`] backed by a `python3` child process.
//!
//! The child runs an embedded bootstrap that executes the candidate with
//! replaced standard streams, `open`, `input`, `__import__` and proscribed
//! built-ins. Each of those talks to us in JSON lines before acting, and we
//! answer through the [`ExecContext`], so the [`SandboxPolicy`] is applied
//! here rather than in the child. A refused request is never answered: the
//! child is killed and the refusal becomes the run's error.
//!
//! [`SandboxPolicy`]: super::SandboxPolicy

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AttrAccess, ExecContext, ExecError, Interpreter};
use crate::assets;

const BOOTSTRAP: &str = "sandbox_bootstrap.py";

/// How often a waiting host looks at the cancellation flag.
const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct PythonEngine {
    python: String,
    work_dir: PathBuf,
}

impl PythonEngine {
    /// `python` is the interpreter command, `work_dir` the directory the
    /// candidate runs in.
    pub fn new(python: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            work_dir: work_dir.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
enum Start<'a> {
    Check {
        source: &'a str,
    },
    Run {
        source: &'a str,
        proscribed: &'a [String],
        restricted: Vec<&'a str>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Message {
    Write {
        stream: Stream,
        text: String,
    },
    Input {
        #[serde(default)]
        optional: bool,
    },
    Open {
        name: String,
    },
    Module {
        name: String,
        attrs: Vec<(String, bool)>,
    },
    Call {
        module: String,
        attr: String,
    },
    Builtin {
        name: String,
    },
    Exit,
    Raised {
        traceback: String,
    },
    Done,
    Syntax {
        message: String,
    },
    #[serde(rename = "ok")]
    Valid,
    Internal {
        message: String,
    },
}

/// One live child. Dropping it kills and reaps the child, so its CPU time
/// shows up in the children's usage as soon as the session ends.
struct Session {
    child: Child,
    stdin: ChildStdin,
    messages: Receiver<Result<Message, String>>,
}

impl Session {
    fn start(engine: &PythonEngine, start: &Start) -> Result<Self, ExecError> {
        let bootstrap = assets::text(BOOTSTRAP)
            .ok_or_else(|| ExecError::Engine(format!("{} is not embedded", BOOTSTRAP)))?;
        let mut child = Command::new(&engine.python)
            .args(["-I", "-u", "-c", &bootstrap])
            .current_dir(&engine.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::Engine(format!("Cannot spawn '{}': {}", engine.python, e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecError::Engine("python3 pipes are missing".to_owned()));
        };
        let (tx, messages) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let msg = line.map_err(|e| e.to_string()).and_then(|line| {
                    serde_json::from_str::<Message>(&line)
                        .map_err(|e| format!("Bad message from python3 {:?}: {}", line, e))
                });
                let failed = msg.is_err();
                if tx.send(msg).is_err() || failed {
                    break;
                }
            }
        });

        let mut session = Self {
            child,
            stdin,
            messages,
        };
        session.send(start)?;
        Ok(session)
    }

    fn send(&mut self, msg: &impl Serialize) -> Result<(), ExecError> {
        let mut line = serde_json::to_string(msg).map_err(|e| ExecError::Engine(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush())
            .map_err(|e| ExecError::Engine(format!("Lost contact with python3: {}", e)))
    }

    /// The next message, checking for cancellation while waiting when a
    /// context is given.
    fn next(&mut self, ctx: Option<&ExecContext>) -> Result<Message, ExecError> {
        loop {
            if let Some(ctx) = ctx {
                ctx.checkpoint()?;
            }
            match self.messages.recv_timeout(POLL) {
                Ok(Ok(msg)) => return Ok(msg),
                Ok(Err(e)) => return Err(ExecError::Engine(e)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ExecError::Engine(self.exit_report()))
                }
            }
        }
    }

    fn exit_report(&mut self) -> String {
        let status = self.child.wait();
        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        match status {
            Ok(status) => format!("python3 stopped unexpectedly ({}): {}", status, stderr.trim()),
            Err(e) => format!("python3 stopped unexpectedly: {}", e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            log::debug!("python3 already gone: {}", e);
        }
        let _ = self.child.wait();
    }
}

fn unexpected(msg: &Message) -> ExecError {
    ExecError::Engine(format!("Unexpected message from python3: {:?}", msg))
}

impl Interpreter for PythonEngine {
    fn check_syntax(&self, source: &str) -> Result<(), String> {
        let checked = Session::start(self, &Start::Check { source })
            .and_then(|mut session| session.next(None));
        match checked {
            Ok(Message::Valid) => Ok(()),
            Ok(Message::Syntax { message }) => Err(message),
            Ok(msg) => Err(unexpected(&msg).to_string()),
            Err(e) => {
                log::error!("syntax check failed: {}", e);
                Err(e.to_string())
            }
        }
    }

    fn execute(&self, source: &str, ctx: &mut ExecContext) -> Result<(), ExecError> {
        let mut session = {
            let policy = ctx.policy();
            let start = Start::Run {
                source,
                proscribed: &policy.proscribed_builtins,
                restricted: policy.modules.keys().map(String::as_str).collect(),
            };
            Session::start(self, &start)?
        };

        loop {
            match session.next(Some(&*ctx))? {
                Message::Write { stream, text } => match stream {
                    Stream::Stdout => ctx.write_stdout(&text)?,
                    Stream::Stderr => ctx.write_stderr(&text)?,
                },
                Message::Input { optional } => {
                    let line = if optional {
                        ctx.try_read_line()?
                    } else {
                        Some(ctx.read_line()?)
                    };
                    session.send(&json!({ "line": line }))?;
                }
                Message::Open { name } => {
                    ctx.open_file(&name)?;
                    session.send(&json!({}))?;
                }
                Message::Module { name, attrs } => {
                    let (mut stub, mut hidden) = (Vec::new(), Vec::new());
                    for (attr, callable) in attrs {
                        match ctx.import_attr(&name, &attr, callable) {
                            AttrAccess::Allowed => {}
                            AttrAccess::Stub => stub.push(attr),
                            AttrAccess::Hidden => hidden.push(attr),
                        }
                    }
                    session.send(&json!({ "stub": stub, "hidden": hidden }))?;
                }
                Message::Call { module, attr } => {
                    ctx.call_attr(&module, &attr)?;
                    session.send(&json!({}))?;
                }
                Message::Builtin { name } => {
                    ctx.call_builtin(&name)?;
                    session.send(&json!({}))?;
                }
                Message::Exit => return Err(ExecError::Exit),
                Message::Raised { traceback } => return Err(ExecError::Raised { traceback }),
                Message::Done => return Ok(()),
                Message::Internal { message } => return Err(ExecError::Engine(message)),
                msg @ (Message::Syntax { .. } | Message::Valid) => return Err(unexpected(&msg)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::config::GradingConfig;
    use crate::lang::Language;
    use crate::sandbox::{
        CompileMode, InProcessRunner, RunOutcome, Runner, SandboxError, SandboxPolicy,
        TerminalState,
    };

    const SECS: fn(u64) -> Duration = Duration::from_secs;

    fn runner(dir: &tempfile::TempDir) -> InProcessRunner {
        let engine = PythonEngine::new("python3", dir.path());
        InProcessRunner::new(
            Language::Python3,
            Arc::new(engine),
            SandboxPolicy::from_config(&GradingConfig::default()),
        )
    }

    async fn run(src: &str, stdin: &str) -> RunOutcome {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(&dir);
        assert!(r.compile(src, CompileMode::Executable, 0).await.unwrap().is_ok());
        r.run_one(stdin, SECS(50), SECS(5)).await.unwrap()
    }

    #[test]
    fn message_format() {
        let msg: Message =
            serde_json::from_str(r#"{"op": "write", "stream": "stderr", "text": "x"}"#).unwrap();
        assert_eq!(
            msg,
            Message::Write {
                stream: Stream::Stderr,
                text: "x".to_owned()
            }
        );
        let msg: Message =
            serde_json::from_str(r#"{"op": "module", "name": "os", "attrs": [["system", true]]}"#)
                .unwrap();
        assert_eq!(
            msg,
            Message::Module {
                name: "os".to_owned(),
                attrs: vec![("system".to_owned(), true)]
            }
        );
        let start = serde_json::to_value(Start::Run {
            source: "pass",
            proscribed: &["eval".to_owned()],
            restricted: vec!["os"],
        })
        .unwrap();
        assert_eq!(
            start,
            json!({ "mode": "run", "source": "pass", "proscribed": ["eval"], "restricted": ["os"] })
        );
    }

    #[tokio::test]
    async fn input_is_echoed() {
        let out = run("name = input('Name? ')\nprint('hello', name)\n", "ann\n").await;
        assert_eq!(out.state, TerminalState::Normal);
        assert_eq!(out.stdout, "Name? ann\nhello ann\n");
        assert_eq!(out.stderr, "");
    }

    #[tokio::test]
    async fn stdin_reads_to_the_end() {
        let out = run("import sys\nprint(len(sys.stdin.read().split()))\n", "1 2\n3\n").await;
        assert_eq!(out.state, TerminalState::Normal);
        // echoed input, then the count
        assert_eq!(out.stdout, "1 2\n3\n3\n");
    }

    #[tokio::test]
    async fn input_past_the_end() {
        let out = run("print('a')\ninput()\n", "").await;
        assert_eq!(out.state, TerminalState::RuntimeError);
        assert_eq!(out.stdout, "a\n");
        assert_eq!(
            out.stderr,
            "'input' function called when no input data available.\n"
        );
    }

    #[tokio::test]
    async fn proscribed_builtin_is_refused() {
        let out = run("print(len('ab'))\nprint(eval('1 + 1'))\n", "").await;
        assert_eq!(out.stdout, "2\n");
        assert_eq!(out.stderr, "Invalid Action: You are not allowed to use 'eval'!\n");
    }

    #[tokio::test]
    async fn protected_files_cannot_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        fsutil::write(dir.path().join("data.txt"), "42\n").unwrap();
        let mut r = runner(&dir);
        let src = "print(open('data.txt').read().strip())\nopen('prog.py')\n";
        r.compile(src, CompileMode::Executable, 0).await.unwrap();
        let out = r.run_one("", SECS(50), SECS(5)).await.unwrap();
        assert_eq!(out.stdout, "42\n");
        assert_eq!(
            out.stderr,
            "Invalid Action: You are not allowed to open 'prog.py'.\n"
        );
    }

    #[tokio::test]
    async fn restricted_module_members() {
        let out = run("import os\nprint(os.path.basename('/a/b'))\nos.system('ls')\n", "").await;
        assert_eq!(out.stdout, "b\n");
        assert_eq!(
            out.stderr,
            "Invalid Action: You are not allowed to use 'os.system'!\n"
        );

        let out = run("from subprocess import run\nrun(['ls'])\n", "").await;
        assert_eq!(
            out.stderr,
            "Invalid Action: You are not allowed to use 'subprocess.run'!\n"
        );
    }

    #[tokio::test]
    async fn traceback_shows_only_candidate_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(&dir);
        let src = "import math\ndef f(x):\n    return 1 / x\nprint(f(0))\n";
        r.compile(src, CompileMode::Executable, 1).await.unwrap();
        let out = r.run_one("", SECS(50), SECS(5)).await.unwrap();
        assert_eq!(out.state, TerminalState::RuntimeError);
        assert!(out.stderr.starts_with("Traceback (most recent call last):\n"), "{}", out.stderr);
        assert!(out.stderr.contains("File \"prog.py\", line 3, in <module>"), "{}", out.stderr);
        assert!(out.stderr.contains("line 2, in f\n    return 1 / x\n"), "{}", out.stderr);
        assert!(out.stderr.ends_with("ZeroDivisionError: division by zero\n"));
        assert!(!out.stderr.contains("<string>"));
    }

    #[tokio::test]
    async fn exit_is_reported() {
        let out = run("import sys\nprint('bye')\nsys.exit(0)\n", "").await;
        assert_eq!(out.stdout, "bye\n");
        assert_eq!(
            out.stderr,
            "Unexpected termination: Please do not call exit() or quit().\n"
        );
    }

    #[tokio::test]
    async fn endless_loop_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(&dir);
        r.compile("print('go', flush=True)\nwhile True:\n    pass\n", CompileMode::Executable, 0)
            .await
            .unwrap();
        let out = r.run_one("", SECS(50), SECS(1)).await.unwrap();
        assert_eq!(out.state, TerminalState::Timeout);
        assert_eq!(out.stdout, "go\n");
        assert_eq!(out.stderr, "Time limit exceeded\n");
        assert!(out.cpu_time >= Duration::from_millis(500), "{:?}", out.cpu_time);
    }

    #[tokio::test]
    async fn syntax_errors_are_remapped() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = runner(&dir);
        let res = r
            .compile("import os\nimport sys\ndef f(:\n    pass\n", CompileMode::Executable, 2)
            .await
            .unwrap();
        let err = res.error.unwrap();
        assert!(err.contains("File \"prog.py\", line 1"), "{}", err);
        assert!(err.contains("SyntaxError"), "{}", err);
        assert!(matches!(
            r.run_one("", SECS(50), SECS(5)).await,
            Err(SandboxError::NotBuilt)
        ));
    }

    #[test]
    fn missing_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PythonEngine::new("no-such-python3", dir.path());
        let err = engine.check_syntax("pass").unwrap_err();
        assert!(err.starts_with("Cannot spawn 'no-such-python3'"), "{}", err);
    }
}
