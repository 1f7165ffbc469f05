use lazy_regex::regex;

use crate::config::GradingConfig;

/// Decides whether the output of a test matches its expected output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparator {
    pub strict_whitespace: bool,
    pub float_tolerance: Option<f64>,
}

impl Comparator {
    pub fn from_config(cfg: &GradingConfig) -> Self {
        Self {
            strict_whitespace: cfg.strict_whitespace,
            float_tolerance: cfg.float_tolerance,
        }
    }

    /// Trailing whitespace of the whole text and of every line is ignored.
    /// Line counts must agree.
    pub fn matches(&self, expected: &str, got: &str) -> bool {
        let expected = expected.trim_end().split('\n').collect::<Vec<_>>();
        let got = got.trim_end().split('\n').collect::<Vec<_>>();
        expected.len() == got.len()
            && expected
                .iter()
                .zip(&got)
                .all(|(e, g)| self.lines_equal(e, g))
    }

    fn lines_equal(&self, expected: &str, got: &str) -> bool {
        let (mut expected, mut got) = (expected.trim_end().to_owned(), got.trim_end().to_owned());
        if !self.strict_whitespace {
            expected = regex!(r"\s+").replace_all(&expected, " ").into_owned();
            got = regex!(r"\s+").replace_all(&got, " ").into_owned();
        }
        match self.float_tolerance {
            None => expected == got,
            Some(tol) => floats_match(&expected, &got, tol),
        }
    }
}

/// Alternating text and number pieces; numbers sit at odd indices.
fn split_floats(s: &str) -> Vec<&str> {
    let re = regex!(r"[-+]?(?:(?:(?:[0-9]+[.]?[0-9]*|[.][0-9]+)(?:[ed][-+]?[0-9]+)?)|inf|nan)");
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in re.find_iter(s) {
        pieces.push(&s[last..m.start()]);
        pieces.push(m.as_str());
        last = m.end();
    }
    pieces.push(&s[last..]);
    pieces
}

fn floats_match(expected: &str, got: &str, tol: f64) -> bool {
    let (e_bits, g_bits) = (split_floats(expected), split_floats(got));
    e_bits.len() == g_bits.len()
        && e_bits.iter().zip(&g_bits).all(|(e, g)| {
            let (e, g) = (e.trim(), g.trim());
            if e == g {
                return true;
            }
            match (e.parse::<f64>(), g.parse::<f64>()) {
                (Ok(a), Ok(b)) => (a - b).abs() <= tol || (a != 0.0 && ((a - b) / a).abs() <= tol),
                _ => false,
            }
        })
}

#[cfg(test)]
mod test {
    use super::*;

    const STRICT: Comparator = Comparator {
        strict_whitespace: true,
        float_tolerance: None,
    };

    fn tolerant(tol: f64) -> Comparator {
        Comparator {
            float_tolerance: Some(tol),
            ..STRICT
        }
    }

    #[test]
    fn identical_and_trailing_whitespace() {
        for s in ["", "4", "a b\n  c\n", "nan inf", "\t x \r"] {
            assert!(STRICT.matches(s, s), "{:?}", s);
            assert!(tolerant(0.1).matches(s, s), "{:?}", s);
        }
        assert!(STRICT.matches("4\n", "4"));
        assert!(STRICT.matches("a  \nb\n\n\n", "a\nb   "));
        assert!(!STRICT.matches("a\nb", "a\n\nb"));
        assert!(!STRICT.matches("a b", "a  b"));
        assert!(!STRICT.matches("a", " a"));
    }

    #[test]
    fn relaxed_whitespace_collapses_runs() {
        let relaxed = Comparator {
            strict_whitespace: false,
            ..STRICT
        };
        assert!(relaxed.matches("a b\tc", "a  b c"));
        assert!(!relaxed.matches("a b", "ab"));
        assert!(!relaxed.matches("a\nb", "a b"));
    }

    #[test]
    fn float_tolerance() {
        assert!(tolerant(0.0001).matches("3.0", "3.0001"));
        assert!(tolerant(0.001).matches("3.0", "3.0001"));
        assert!(!tolerant(0.00001).matches("3.0", "3.0001"));
        assert!(!STRICT.matches("3.0", "3.0001"));

        assert!(tolerant(0.01).matches("x = 1.5e3, y = -2", "x = 1500.1, y = -2.0"));
        assert!(!tolerant(0.01).matches("x = 1.5", "y = 1.5"));
        assert!(!tolerant(0.01).matches("1.5 2.5", "1.5"));
        // relative to the expected value
        assert!(tolerant(0.01).matches("1000", "1005"));
        assert!(!tolerant(0.01).matches("0", "0.5"));
    }

    #[test]
    fn split_keeps_numbers_at_odd_indices() {
        assert_eq!(split_floats("a 1.5 b -2"), vec!["a ", "1.5", " b ", "-2", ""]);
        assert_eq!(split_floats("none"), vec!["none"]);
    }
}
