//! External static-analysis tools run over the candidate source.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use fsutil::ScopedFile;
use lazy_regex::regex;
use tokio::process::Command;

use crate::config::GradingConfig;
use crate::lang::Language;
use crate::sandbox::SandboxError;
use crate::template;

const LINT_TIMEOUT: Duration = Duration::from_secs(60);
const MYPY_HEADER: &str =
    "from typing import List as list, Dict as dict, Tuple as tuple, Set as set, Any\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linter {
    pub name: String,
    /// Command template; `#{src}` is the checked file.
    pub command: String,
    /// Text put before the prelude, e.g. imports the tool needs.
    pub header: String,
}

impl Linter {
    pub fn pylint(options: &[String]) -> Self {
        let mut command = "python3 -m pylint".to_owned();
        for opt in options {
            command.push(' ');
            command += &opt.replace('#', "##");
        }
        command += " #{src}";
        Self {
            name: "pylint".to_owned(),
            command,
            header: String::new(),
        }
    }

    pub fn mypy() -> Self {
        Self {
            name: "mypy".to_owned(),
            command: "python3 -m mypy --no-error-summary --no-strict-optional #{src}".to_owned(),
            header: MYPY_HEADER.to_owned(),
        }
    }

    /// The tools named in `precheckers`, in order. Names that are neither
    /// built in nor configured in `linters` are skipped with a warning.
    pub fn configured(cfg: &GradingConfig) -> Vec<Self> {
        cfg.precheckers
            .iter()
            .filter_map(|name| match (name.as_str(), cfg.linters.get(name)) {
                (_, Some(command)) => Some(Self {
                    name: name.clone(),
                    command: command.clone(),
                    header: String::new(),
                }),
                ("pylint", None) => Some(Self::pylint(&cfg.pylint_options)),
                ("mypy", None) => Some(Self::mypy()),
                (_, None) => {
                    log::warn!("Unknown prechecker '{}' ignored", name);
                    None
                }
            })
            .collect()
    }

    fn line_offset(&self, prelude_lines: usize) -> i64 {
        (self.header.lines().count() + prelude_lines) as i64
    }

    /// Runs the tool over `code` (prelude and answer). Returns `None` when it
    /// exits successfully, otherwise its output with line numbers rewritten
    /// to the answer's own.
    pub async fn run(
        &self,
        language: Language,
        code: &str,
        prelude_lines: usize,
        work_dir: &Path,
    ) -> Result<Option<String>, SandboxError> {
        let filename = format!("__source.{}", language.extension());
        let _source = ScopedFile::with_contents(
            work_dir.join(&filename),
            format!("{}{}", self.header, code),
        )?;
        let vars = HashMap::from([("src", filename.as_str())]);
        let cmd = template::render(&self.command, &vars)?;
        log::info!("running {}: {}", self.name, cmd);

        let child = Command::new("bash")
            .args(["-c", &cmd])
            .current_dir(work_dir)
            .env("HOME", work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Spawn(cmd.clone(), e))?;

        let output = match tokio::time::timeout(LINT_TIMEOUT, child.wait_with_output()).await {
            Ok(output) => output.map_err(SandboxError::Wait)?,
            Err(_) => {
                return Ok(Some(format!(
                    "{} timed out after {} seconds",
                    self.name,
                    LINT_TIMEOUT.as_secs()
                )))
            }
        };
        if output.status.success() {
            return Ok(None);
        }

        let mut text = fsutil::escape_invalid_utf8(&output.stdout);
        text += &fsutil::escape_invalid_utf8(&output.stderr);
        Ok(Some(self.clean_output(&text, prelude_lines)))
    }

    fn clean_output(&self, text: &str, prelude_lines: usize) -> String {
        let offset = self.line_offset(prelude_lines);
        let re = regex!(r"__source\.\w+:(\d+)");
        text.lines()
            .filter(|line| !line.starts_with("Using config file"))
            .map(|line| {
                let Some(num) = re.captures(line).and_then(|caps| caps.get(1)) else {
                    return line.to_owned();
                };
                match num.as_str().parse::<i64>() {
                    Ok(n) => format!("{}{}{}", &line[..num.start()], n - offset, &line[num.end()..]),
                    Err(_) => line.to_owned(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
