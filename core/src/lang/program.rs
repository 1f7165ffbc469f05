//! Assembly of the programs that are actually compiled and run: prelude,
//! candidate answer and test code, optionally all tests in one program with a
//! sentinel line printed between them.

use std::sync::Arc;

use crate::config::{ExtraMode, GradingConfig};
use crate::sandbox::CompileMode;
use crate::testcase::TestCase;

use super::{Language, LineRemapper};

const DUMMY_DOCSTRING: &str = "\"\"\"Dummy docstring for a function\"\"\"\n";

const C_INCLUDES: &[&str] = &["stdio.h", "stdlib.h", "string.h", "ctype.h", "math.h"];
const CPP_INCLUDES: &[&str] = &["cstdio", "cstdlib", "cmath", "iostream", "string", "vector"];

#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    language: Language,
    cfg: Arc<GradingConfig>,
    prelude: String,
    answer: String,
    sentinel: String,
}

/// Strips trailing whitespace from every line and ends the text with exactly
/// one newline.
pub fn clean_answer(answer: &str) -> String {
    let s = answer
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n", s.trim_end())
}

fn has_docstring(answer: &str) -> bool {
    let s = answer.trim_start();
    s.starts_with('"') || s.starts_with('\'')
}

impl ProgramBuilder {
    pub fn new(language: Language, cfg: Arc<GradingConfig>, answer: &str) -> Self {
        let sentinel = format!("#<ab@{:08x}#@>#", rand::random::<u32>());
        let answer = clean_answer(answer);
        let prelude = make_prelude(language, &cfg, &answer);
        Self {
            language,
            cfg,
            prelude,
            answer,
            sentinel,
        }
    }

    /// Same builder (and sentinel) around a different answer text.
    pub fn with_answer(mut self, answer: &str) -> Self {
        self.answer = clean_answer(answer);
        self.prelude = make_prelude(self.language, &self.cfg, &self.answer);
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn prelude(&self) -> &str {
        &self.prelude
    }

    pub fn prelude_lines(&self) -> usize {
        self.prelude.lines().count()
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn remapper(&self) -> LineRemapper {
        LineRemapper::new(self.language, self.prelude_lines())
    }

    fn is_c_program(&self) -> bool {
        self.language.is_compiled() && !self.cfg.is_function
    }

    /// The candidate on its own, used for the trial compile when tests cannot
    /// be combined and for the passive-output check.
    pub fn candidate(&self) -> String {
        format!("{}{}", self.prelude, self.answer)
    }

    pub fn candidate_mode(&self) -> CompileMode {
        if self.language.is_compiled() && self.cfg.is_function {
            CompileMode::Object
        } else {
            CompileMode::Executable
        }
    }

    pub fn stdin_for<'t>(&self, test: &'t TestCase) -> &'t str {
        if self.cfg.stdin_from_extra() {
            test.extra()
        } else {
            test.stdin()
        }
    }

    pub fn can_combine(&self, tests: &[TestCase]) -> bool {
        !self.cfg.run_tests_singly
            && !tests.is_empty()
            && !self.is_c_program()
            && tests.iter().all(|t| self.stdin_for(t).trim().is_empty())
    }

    fn test_block(&self, test: &TestCase) -> String {
        let cfg = &self.cfg;
        let mut block = String::new();
        let mut push = |code: &str| {
            if !code.trim().is_empty() {
                block += code.trim_end();
                block.push('\n');
            }
        };
        if cfg.global_extra == ExtraMode::Pretest {
            push(&cfg.global_extra_code);
        }
        if cfg.extra == ExtraMode::Pretest {
            push(test.extra());
        }
        push(test.code());
        if cfg.global_extra == ExtraMode::Posttest {
            push(&cfg.global_extra_code);
        }
        if cfg.extra == ExtraMode::Posttest {
            push(test.extra());
        }
        block
    }

    fn separator_code(&self) -> String {
        let sep = &self.sentinel;
        match self.language {
            Language::Python3 => format!(
                "print(\"{sep}\", flush=True)\nprint(\"{sep}\", file=__import__(\"sys\").stderr, flush=True)\n"
            ),
            Language::C | Language::Cpp => format!(
                "    printf(\"%s\\n\", \"{sep}\"); fflush(stdout);\n    fprintf(stderr, \"%s\\n\", \"{sep}\"); fflush(stderr);\n"
            ),
        }
    }

    fn c_main(&self, body: &str) -> String {
        let signature = match self.language {
            Language::Cpp => "int main()",
            _ => "int main(void)",
        };
        format!("\n{} {{\n{}    return 0;\n}}\n", signature, body)
    }

    fn c_block(block: &str) -> String {
        let mut s = String::from("    {\n");
        for line in block.lines() {
            s += "        ";
            s += line;
            s.push('\n');
        }
        s += "    }\n";
        s
    }

    /// The program for a single test.
    pub fn single(&self, test: &TestCase) -> String {
        match self.language {
            Language::Python3 => format!("{}{}{}", self.prelude, self.answer, self.test_block(test)),
            _ if self.is_c_program() => self.candidate(),
            _ => {
                let body = Self::c_block(&self.test_block(test));
                format!("{}{}{}", self.prelude, self.answer, self.c_main(&body))
            }
        }
    }

    /// All tests in one program, the sentinel printed to stdout and stderr
    /// between consecutive tests.
    pub fn combined(&self, tests: &[TestCase]) -> String {
        let sep = self.separator_code();
        match self.language {
            Language::Python3 => {
                let blocks = tests.iter().map(|t| self.test_block(t)).collect::<Vec<_>>();
                format!("{}{}{}", self.prelude, self.answer, blocks.join(&sep))
            }
            _ => {
                let blocks = tests
                    .iter()
                    .map(|t| Self::c_block(&self.test_block(t)))
                    .collect::<Vec<_>>();
                let body = blocks.join(&sep);
                format!("{}{}{}", self.prelude, self.answer, self.c_main(&body))
            }
        }
    }

    /// Splits combined-run output into per-test segments.
    pub fn split_output(&self, text: &str) -> Vec<String> {
        let delim = format!("{}\n", self.sentinel);
        let normalized = format!("{}\n", text.trim_end());
        normalized.split(&delim).map(str::to_owned).collect()
    }
}

fn make_prelude(language: Language, cfg: &GradingConfig, answer: &str) -> String {
    let mut prelude = String::new();
    match language {
        Language::Python3 => {
            let docstring = has_docstring(answer);
            if cfg.is_function && !docstring {
                prelude += DUMMY_DOCSTRING;
            }
            for import in &cfg.imports {
                if !import.contains(' ') {
                    prelude += "import ";
                }
                prelude += import;
                prelude.push('\n');
            }
            if !cfg.prelude.is_empty() {
                prelude += "\n";
                prelude += cfg.prelude.trim_end();
                prelude.push('\n');
            }
            if docstring && !prelude.is_empty() {
                prelude.insert_str(0, DUMMY_DOCSTRING);
            }
        }
        Language::C | Language::Cpp => {
            let defaults = if language == Language::C {
                C_INCLUDES
            } else {
                CPP_INCLUDES
            };
            if cfg.is_function {
                for header in defaults {
                    prelude += &format!("#include <{}>\n", header);
                }
                if language == Language::Cpp {
                    prelude += "using namespace std;\n";
                }
            }
            for import in &cfg.imports {
                if import.starts_with('#') {
                    prelude += import;
                } else {
                    prelude += &format!("#include <{}>", import);
                }
                prelude.push('\n');
            }
            if !cfg.prelude.is_empty() {
                prelude += cfg.prelude.trim_end();
                prelude.push('\n');
            }
        }
    }
    prelude
}
