use lazy_regex::{regex, Regex};

use super::Language;

struct Pattern {
    re: &'static Regex,
    /// Capture groups holding line numbers.
    line_groups: &'static [usize],
}

fn pat(re: &'static Regex, line_groups: &'static [usize]) -> Pattern {
    Pattern { re, line_groups }
}

fn python_patterns() -> Vec<Pattern> {
    vec![
        pat(regex!(r"^(.*<fstring>.* \(syntax-error\).*)$"), &[]),
        pat(regex!(r#"^(.*File ".*", line +)(\d+)(.*)$"#), &[2]),
        pat(regex!(r"^(.*: *)(\d+)(, *\d+:.*\(.*line +)(\d+)(\).*)$"), &[2, 4]),
        pat(regex!(r"^(.*: *)(\d+)(, *\d+:.*\(.*\).*)$"), &[2]),
        pat(regex!(r"^(.*:)(\d+)(:\d+: [A-Z]\d+: .*line )(\d+)(.*)$"), &[2, 4]),
        pat(regex!(r"^(.*:)(\d+)(:\d+: [A-Z]\d+: .*)$"), &[2]),
    ]
}

fn clike_patterns() -> Vec<Pattern> {
    vec![
        pat(regex!(r"^(.*?\.(?:c|cc|cpp|cxx|h|hpp):)(\d+)(:.*)$"), &[2]),
        pat(regex!(r"^(.*\((?:\S+)\.(?:c|cc|cpp):)(\d+)(\).*)$"), &[2]),
    ]
}

/// Rewrites line numbers in diagnostics so they refer to the candidate's
/// own source rather than the assembled program with its prelude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRemapper {
    language: Language,
    offset: i64,
}

impl LineRemapper {
    pub fn new(language: Language, prelude_lines: usize) -> Self {
        Self {
            language,
            offset: prelude_lines as i64,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn remap(&self, text: &str) -> String {
        if self.offset == 0 || text.is_empty() {
            return text.to_owned();
        }
        let patterns = match self.language {
            Language::Python3 => python_patterns(),
            Language::C | Language::Cpp => clike_patterns(),
        };
        let mut out = text
            .lines()
            .map(|line| self.remap_line(line, &patterns))
            .collect::<Vec<_>>()
            .join("\n");
        if text.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    fn remap_line(&self, line: &str, patterns: &[Pattern]) -> String {
        for Pattern { re, line_groups } in patterns {
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let mut out = String::with_capacity(line.len());
            for i in 1..caps.len() {
                let group = caps.get(i).map_or("", |m| m.as_str());
                if line_groups.contains(&i) {
                    match group.parse::<i64>() {
                        Ok(n) => out += &(n - self.offset).to_string(),
                        Err(_) => out += group,
                    }
                } else {
                    out += group;
                }
            }
            return out;
        }
        line.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn python_traceback_lines() {
        let r = LineRemapper::new(Language::Python3, 3);
        let tb = "Traceback (most recent call last):\n  File \"prog.py\", line 7, in <module>\n    print(sqr(2))\n  File \"prog.py\", line 5, in sqr\nZeroDivisionError: division by zero";
        assert_eq!(
            r.remap(tb),
            "Traceback (most recent call last):\n  File \"prog.py\", line 4, in <module>\n    print(sqr(2))\n  File \"prog.py\", line 2, in sqr\nZeroDivisionError: division by zero"
        );
        assert_eq!(
            r.remap("  File \"prog.py\", line 4\n    def f(:"),
            "  File \"prog.py\", line 1\n    def f(:"
        );
    }

    #[test]
    fn pylint_style_lines() {
        let r = LineRemapper::new(Language::Python3, 2);
        assert_eq!(
            r.remap("__source.py:10:0: C0116: Missing function or method docstring (missing-function-docstring)"),
            "__source.py:8:0: C0116: Missing function or method docstring (missing-function-docstring)"
        );
        assert_eq!(
            r.remap("__source.py:12:4: R1705: Unnecessary else after return, first defined at line 9 (x)"),
            "__source.py:10:4: R1705: Unnecessary else after return, first defined at line 7 (x)"
        );
    }

    #[test]
    fn gcc_lines() {
        let r = LineRemapper::new(Language::C, 6);
        assert_eq!(
            r.remap("prog.c: In function 'sqr':\nprog.c:9:5: error: expected ';' before '}' token"),
            "prog.c: In function 'sqr':\nprog.c:3:5: error: expected ';' before '}' token"
        );
    }

    #[test]
    fn trailing_newline_survives() {
        let r = LineRemapper::new(Language::Python3, 1);
        assert_eq!(
            r.remap("  File \"prog.py\", line 3, in <module>\nNameError: x\n"),
            "  File \"prog.py\", line 2, in <module>\nNameError: x\n"
        );
        assert_eq!(r.remap("NameError: x"), "NameError: x");
    }

    #[test]
    fn zero_offset_is_identity() {
        let r = LineRemapper::new(Language::Python3, 0);
        let s = "  File \"prog.py\", line 7, in <module>\n";
        assert_eq!(r.remap(s), s);
    }
}
