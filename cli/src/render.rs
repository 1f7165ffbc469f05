use std::fmt;

use assess_core::{outcome::Outcome, result::ResultRow};
use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
    NotRun,
}

impl Verdict {
    pub fn of(row: &ResultRow) -> Self {
        if row.not_run {
            Self::NotRun
        } else if row.is_correct {
            Self::Pass
        } else {
            Self::Fail
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::NotRun => "SKIP",
        })
    }
}

impl ColorTheme for Verdict {
    fn color(&self) -> Color {
        use Verdict::*;
        if !self::is_truecolor_supported() {
            return match self {
                Pass => Color::Green,
                Fail => Color::Red,
                NotRun => Color::Yellow,
            };
        }

        match self {
            Pass => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            Fail => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            NotRun => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
        }
    }
}

pub fn verdict_icon(verdict: Verdict) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {} ", verdict)
        .on_color(verdict.color())
        .bold()
        .color(fg)
}

/// One line such as `----- 2/3 tests failed (mark 33%) -----`.
pub fn summary_line(outcome: &Outcome) -> String {
    let total = outcome.rows.len();
    let passed = outcome.rows.iter().filter(|r| Verdict::of(r) == Verdict::Pass).count();
    let percent = format!("mark {:.0}%", outcome.fraction * 100.0);

    let msg = if total == 0 {
        format!("No tests run, {}", percent)
    } else if passed == total {
        format!("All {} tests passed, {}", total, percent)
    } else {
        format!("{}/{} tests failed, {}", total - passed, total, percent)
    };
    let msg = if outcome.is_perfect() {
        msg.green()
    } else {
        msg.bright_red()
    };
    let bar = "-".repeat(5);
    format!("{} {} {}", bar, msg, bar)
}

pub fn print_outcome(outcome: &Outcome, show_hidden: bool) {
    if !outcome.prologue.is_empty() {
        println!("{}", outcome.prologue.bright_yellow());
    }

    for (i, row) in outcome.rows.iter().enumerate() {
        if row.is_hidden && !show_hidden {
            continue;
        }
        self::print_row_detail(i + 1, row);
    }

    if !outcome.epilogue.is_empty() {
        println!("{}", outcome.epilogue.bright_red());
    }
    println!("{}", self::summary_line(outcome));
}

pub fn print_row_detail(index: usize, row: &ResultRow) {
    let (cols, _) = terminal::size().unwrap_or((40, 40));
    let cols = (cols as usize).max(16);

    const BOLD_LINE: &str = "━";
    const THIN_LINE: &str = "─";

    let bold_bar = BOLD_LINE.repeat(cols).blue().bold();
    let hidden = if row.is_hidden { " (hidden)" } else { "" };
    println!(
        "\n{}{}: {}\n{}",
        format!("Test #{}", index).bright_yellow().bold(),
        hidden.dimmed(),
        self::verdict_icon(Verdict::of(row)),
        bold_bar,
    );

    fn print_sub_title(s: &str, cols: usize) {
        println!(
            "{}{}",
            s.cyan().bold(),
            THIN_LINE.repeat(cols.saturating_sub(s.len() + 1)).bright_black(),
        )
    }

    fn print_lines(text: &str) {
        if text.is_empty() {
            println!("{}", "<EMPTY>".magenta().dimmed());
            return;
        }
        for line in text.lines() {
            let trimmed = line.trim_end();
            print!("{}", trimmed);
            let num_trailing_whitespace = line.len() - trimmed.len();
            if num_trailing_whitespace > 0 {
                print!("{}", " ".repeat(num_trailing_whitespace).on_red());
            }
            println!();
        }
    }

    if let Some(test) = &row.test {
        print_sub_title("[test]", cols);
        print_lines(test);
    }
    if let Some(stdin) = &row.stdin {
        print_sub_title("[input]", cols);
        print_lines(stdin);
    }
    print_sub_title("[expected]", cols);
    print_lines(&row.expected);
    print_sub_title("[got]", cols);
    print_lines(&row.got);

    println!("{}", bold_bar);
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(is_correct: bool, not_run: bool) -> ResultRow {
        ResultRow {
            is_correct,
            test: None,
            stdin: None,
            expected: "1".to_owned(),
            got: "1".to_owned(),
            is_hidden: false,
            not_run,
        }
    }

    fn outcome(fraction: f64, rows: Vec<ResultRow>) -> Outcome {
        Outcome {
            fraction,
            columns: vec!["Expected", "Got"],
            rows,
            prologue: String::new(),
            epilogue: String::new(),
            global_error: None,
            missing_tests: 0,
            aborted: false,
            failed_hidden: false,
        }
    }

    #[test]
    fn verdicts() {
        assert_eq!(Verdict::of(&row(true, false)), Verdict::Pass);
        assert_eq!(Verdict::of(&row(false, false)), Verdict::Fail);
        assert_eq!(Verdict::of(&row(false, true)), Verdict::NotRun);
        assert_eq!(Verdict::NotRun.to_string(), "SKIP");
    }

    #[test]
    fn summary_counts_not_run_rows_as_failures() {
        colored::control::set_override(false);
        let all = outcome(1.0, vec![row(true, false), row(true, false)]);
        assert_eq!(summary_line(&all), "----- All 2 tests passed, mark 100% -----");

        let some = outcome(0.5, vec![row(true, false), row(false, true)]);
        assert_eq!(summary_line(&some), "----- 1/2 tests failed, mark 50% -----");

        let none = outcome(0.0, vec![]);
        assert_eq!(summary_line(&none), "----- No tests run, mark 0% -----");
    }
}
