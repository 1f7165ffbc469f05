pub mod lexer;
pub mod linter;
pub mod syntax;
pub mod walk;

use std::collections::BTreeSet;
use std::path::Path;

use lazy_regex::{regex, Regex};

use crate::config::{GradingConfig, RequiredSubstring};
use crate::lang::Language;
use crate::sandbox::SandboxError;

pub use linter::Linter;
pub use walk::{analyse, Analysis};

pub const STYLE_FAILED: &str = "Sorry, but your code doesn't pass the style checks.";

/// User-facing name of a construct tag.
pub fn prettied(construct: &str) -> String {
    match construct {
        "listcomprehension" => "list comprehension".to_owned(),
        "dictcomprehension" => "dictionary comprehension".to_owned(),
        "setcomprehension" => "set comprehension".to_owned(),
        "while" => "while loop".to_owned(),
        "for" => "for loop".to_owned(),
        "try" => "try ... except statement".to_owned(),
        "slice" => "slice".to_owned(),
        other => format!("{} statement", other),
    }
}

/// Static checks of a candidate answer against the grading policy. Never
/// runs the candidate; external linters only read the source.
#[derive(Debug, Clone, Copy)]
pub struct StyleChecker<'a> {
    language: Language,
    cfg: &'a GradingConfig,
    work_dir: &'a Path,
}

impl<'a> StyleChecker<'a> {
    pub fn new(language: Language, cfg: &'a GradingConfig, work_dir: &'a Path) -> Self {
        Self {
            language,
            cfg,
            work_dir,
        }
    }

    /// Violations in display order, empty when the answer is clean.
    ///
    /// Local checks come first; linters only run over an answer that passed
    /// them, and the type-hint check only when the linters found nothing.
    pub async fn check(&self, prelude: &str, answer: &str) -> Result<Vec<String>, SandboxError> {
        let analysis = if self.language.has_syntax_walker() {
            match analyse(answer) {
                Ok(a) => a,
                Err(e) => return Ok(vec![e.to_string()]),
            }
        } else {
            clike_analysis(answer)
        };

        let local = local_errors(self.language, answer, &analysis, self.cfg);
        if !local.is_empty() {
            return Ok(local);
        }

        let mut errors = Vec::new();
        let mut diagnostics = String::new();
        let code = format!("{}{}", prelude, answer);
        let prelude_lines = prelude.lines().count();
        for linter in Linter::configured(self.cfg) {
            match linter.run(self.language, &code, prelude_lines, self.work_dir).await? {
                Some(out) if out.trim().is_empty() => {
                    diagnostics = format!("{} failed without any output", linter.name);
                    break;
                }
                Some(out) => {
                    diagnostics = out;
                    break;
                }
                None if linter.name == "pylint" => {
                    if analysis.comments.iter().any(|c| c.contains("pylint:")) {
                        errors.push("Comments can not include 'pylint:'".to_owned());
                    }
                }
                None => {}
            }
        }

        if diagnostics.is_empty() && self.cfg.require_type_hints {
            for name in &analysis.unhinted_functions {
                diagnostics += &format!("Function '{}' does not have correct type hints\n", name);
            }
        }

        if !diagnostics.trim().is_empty() {
            errors = diagnostics.trim().lines().map(str::to_owned).collect();
            errors.push(STYLE_FAILED.to_owned());
        }
        Ok(errors)
    }
}

fn required_substring_error(answer: &str, required: &RequiredSubstring) -> Option<String> {
    match required {
        RequiredSubstring::Plain(s) => (!answer.contains(s.as_str()))
            .then(|| format!("The string \"{}\" must occur somewhere in your code.", s)),
        RequiredSubstring::Literal {
            string,
            error_message,
        } => (!answer.contains(string.as_str())).then(|| error_message.clone()),
        RequiredSubstring::Pattern {
            pattern,
            error_message,
        } => {
            let found = match Regex::new(pattern) {
                Ok(re) => re.is_match(answer),
                Err(e) => {
                    log::warn!("Bad required pattern {:?}: {}", pattern, e);
                    false
                }
            };
            (!found).then(|| error_message.clone())
        }
    }
}

/// Policy checks that need nothing but the source and its analysis.
pub fn local_errors(
    language: Language,
    answer: &str,
    analysis: &Analysis,
    cfg: &GradingConfig,
) -> Vec<String> {
    let mut errors = Vec::new();

    for banned in &cfg.proscribed_substrings {
        if answer.contains(banned.as_str()) {
            errors.push(format!(
                "The string '{}' is not permitted anywhere in your code.",
                banned
            ));
        }
    }
    errors.extend(
        cfg.required_substrings
            .iter()
            .filter_map(|r| required_substring_error(answer, r)),
    );

    if cfg.ban_global_code {
        errors.extend(analysis.global_code.iter().cloned());
    }

    if !cfg.allow_nested_functions {
        for name in &analysis.nested_functions {
            errors.push(format!("Function '{}' is defined inside another function", name));
        }
    }

    let max = cfg.max_function_length;
    for (name, count) in analysis.function_lengths.iter().filter(|(_, n)| *n > max) {
        errors.push(format!(
            "Function '{}' is too long\n({} statements, max is {})",
            name, count, max
        ));
    }

    for name in &cfg.proscribed_functions {
        if analysis.calls.contains_key(name) {
            errors.push(format!("You called the banned function '{}'.", name));
        }
    }
    for name in &cfg.required_function_calls {
        if !analysis.calls.contains_key(name) {
            errors.push(format!("You forgot to use the required function '{}'.", name));
        }
    }
    for name in &cfg.required_function_definitions {
        if !analysis.defined_functions.contains(name) {
            errors.push(format!("You forgot to define the required function '{}'.", name));
        }
    }

    for tag in &cfg.required_constructs {
        if !analysis.constructs.contains(tag.as_str()) {
            errors.push(format!(
                "Your program must include at least one {}.",
                prettied(tag)
            ));
        }
    }
    for tag in &cfg.proscribed_constructs {
        if analysis.constructs.contains(tag.as_str()) {
            errors.push(format!("Your program must not include any {}s.", prettied(tag)));
        }
    }

    if language == Language::Python3 {
        let constants = answer
            .split('\n')
            .filter(|line| regex!(r"^ *[A-Z_][A-Z_0-9]* *=").is_match(line))
            .count();
        if constants > cfg.max_num_constants {
            errors.push(format!(
                "You may not use more than {} constants.",
                cfg.max_num_constants
            ));
        }
    }

    for (module, names) in &analysis.imports {
        let Some(rule) = cfg.restricted_modules.get(module) else {
            continue;
        };
        if rule.forbids_everything() {
            errors.push(format!(
                "Your program should not import anything from '{}'.",
                module
            ));
            continue;
        }
        for name in names.iter().filter(|n| !rule.permits(n)) {
            errors.push(format!(
                "Your program should not import '{}' from '{}'.",
                name, module
            ));
        }
    }

    errors
}

const CLIKE_CONSTRUCTS: &[&str] = &[
    "goto", "while", "for", "do", "switch", "if", "return", "break", "continue",
];

/// Keyword-level analysis of C and C++ sources: constructs, called and
/// defined function names. Comments and literals are ignored.
pub fn clike_analysis(source: &str) -> Analysis {
    let stripped = regex!(r#"(?s)//[^\n]*|/\*.*?\*/|"(?:\\.|[^"\\\n])*"|'(?:\\.|[^'\\\n])*'"#)
        .replace_all(source, " ");

    let mut analysis = Analysis::default();
    let words: BTreeSet<&str> = regex!(r"\b[A-Za-z_]\w*\b")
        .find_iter(&stripped)
        .map(|m| m.as_str())
        .collect();
    analysis.constructs = CLIKE_CONSTRUCTS
        .iter()
        .copied()
        .filter(|k| words.contains(k))
        .collect();

    for caps in regex!(r"\b([A-Za-z_]\w*)\s*\(").captures_iter(&stripped) {
        let name = &caps[1];
        if CLIKE_CONSTRUCTS.contains(&name) || name == "sizeof" {
            continue;
        }
        analysis.calls.entry(name.to_owned()).or_default().push((0, 0));
    }
    for caps in regex!(r"(?m)^[A-Za-z_][\w \t\*]*?\b([A-Za-z_]\w*)\s*\([^;{)]*\)\s*\{")
        .captures_iter(&stripped)
    {
        analysis.defined_functions.insert(caps[1].to_owned());
    }
    analysis
}
