use std::sync::Arc;
use std::time::Duration;

use assess_core::config::GradingConfig;
use assess_core::lang::Language;
use assess_core::sandbox::{Backend, ExecContext, ExecError, Interpreter, PythonEngine};
use assess_core::testcase::{DisplayPolicy, TestCase};
use assess_core::{GradingSession, Outcome, Submission, Tester};

async fn grade_with(session: &GradingSession, answer: &str, tests: Vec<TestCase>) -> Outcome {
    let submission = Submission {
        answer: answer.to_owned(),
        tests,
        is_precheck: false,
    };
    Tester::new(session, submission).test_code().await.unwrap()
}

async fn grade_python(cfg: GradingConfig, answer: &str, tests: Vec<TestCase>) -> Outcome {
    let dir = tempfile::tempdir().unwrap();
    let session = GradingSession::new(Language::Python3, cfg, dir.path());
    grade_with(&session, answer, tests).await
}

#[tokio::test]
async fn correct_function_gets_full_marks() {
    let answer = "def sqr(n):\n    \"\"\"Square of n.\"\"\"\n    return n * n\n";
    let tests = vec![
        TestCase::new("print(sqr(2))", "4\n"),
        TestCase::new("print(sqr(-3))", "9\n"),
    ];
    let o = grade_python(GradingConfig::default(), answer, tests).await;
    assert_eq!(o.fraction, 1.0, "{:#?}", o);
    assert_eq!(o.columns, vec!["Test", "Expected", "Got"]);
    assert_eq!(o.rows[0].got, "4");
    assert!(o.rows.iter().all(|r| r.is_correct));
    assert_eq!(o.prologue, "");
    assert_eq!(o.epilogue, "");
}

#[tokio::test]
async fn runtime_error_aborts_remaining_tests() {
    let answer = "def f(x):\n    return 10 // x\n";
    let tests = vec![
        TestCase::new("print(f(0))", "0\n"),
        TestCase::new("print(f(5))", "2\n"),
    ];
    let o = grade_python(GradingConfig::default(), answer, tests).await;
    assert_eq!(o.fraction, 0.0);
    assert!(o.aborted);
    assert_eq!(o.missing_tests, 1);
    assert!(!o.rows[0].is_correct);
    assert!(o.rows[0].got.contains("ZeroDivisionError"), "{}", o.rows[0].got);
    // the dummy docstring put before the answer is not counted
    assert!(o.rows[0].got.contains("line 2, in f"), "{}", o.rows[0].got);
    assert!(o.rows[1].not_run);
    assert!(o.epilogue.contains("1 tests not run due to previous errors."));
}

#[tokio::test]
async fn proscribed_construct_fails_before_running() {
    let answer = "def countdown(n):\n    while n > 0:\n        n -= 1\n    return n\n";
    let o = grade_python(
        GradingConfig {
            proscribed_constructs: vec!["while".to_owned()],
            ..Default::default()
        },
        answer,
        vec![TestCase::new("print(countdown(3))", "0\n")],
    )
    .await;
    assert_eq!(o.fraction, 0.0);
    assert!(o.rows.is_empty());
    assert_eq!(
        o.prologue,
        "Pre-run checks failed\nYour program must not include any while loops."
    );
}

#[tokio::test]
async fn programs_reading_stdin_get_partial_marks() {
    let cfg = GradingConfig {
        is_function: false,
        ban_global_code: false,
        all_or_nothing: false,
        ..Default::default()
    };
    let answer = "n = int(input())\nprint(n * n)\n";
    let tests = vec![
        TestCase::new("", "9\n").with_stdin("3\n"),
        TestCase::new("", "16\n").with_stdin("4\n"),
        TestCase::new("", "wrong\n")
            .with_stdin("5\n")
            .with_display(DisplayPolicy::Hide),
    ];
    let o = grade_python(cfg, answer, tests).await;
    assert!((o.fraction - 2.0 / 3.0).abs() < 1e-9, "{}", o.fraction);
    assert_eq!(o.columns, vec!["Input", "Expected", "Got"]);
    assert!(o.failed_hidden);
    assert_eq!(o.visible_rows().count(), 2);
    assert_eq!(o.epilogue, "One or more hidden tests failed.");
}

#[tokio::test]
async fn infinite_loop_times_out_as_a_whole() {
    let cfg = GradingConfig {
        timeout: 2,
        ..Default::default()
    };
    let answer = "def spin():\n    while True:\n        pass\n";
    let tests = vec![
        TestCase::new("print(1)", "1\n"),
        TestCase::new("spin()", "2\n"),
        TestCase::new("print(3)", "3\n"),
    ];
    let o = grade_python(cfg, answer, tests).await;
    assert_eq!(o.fraction, 0.0);
    assert_eq!(
        o.global_error.as_deref(),
        Some(assess_core::tester::TIMEOUT_MESSAGE)
    );
    assert!(o.rows[0].is_correct);
    assert!(o.rows[2].not_run);
}

#[tokio::test]
async fn sleeping_costs_no_cpu_budget() {
    // CPU seconds, not wall-clock seconds, are charged in a subprocess.
    let cfg = GradingConfig {
        timeout: 2,
        is_function: false,
        ban_global_code: false,
        ..Default::default()
    };
    let answer = "import time\ntime.sleep(3)\nprint('awake')\n";
    let o = grade_python(cfg, answer, vec![TestCase::new("", "awake\n")]).await;
    assert_eq!(o.fraction, 1.0, "{:#?}", o);
}

/// An engine that only knows how to sleep and print.
struct Sleeper;

impl Interpreter for Sleeper {
    fn check_syntax(&self, _source: &str) -> Result<(), String> {
        Ok(())
    }

    fn execute(&self, source: &str, ctx: &mut ExecContext) -> Result<(), ExecError> {
        for line in source.lines() {
            if let Some(ms) = line.strip_prefix("nap(").and_then(|s| s.strip_suffix(')')) {
                let ms = ms.parse::<u64>().unwrap_or(0);
                for _ in 0..ms / 10 {
                    ctx.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(10));
                }
            } else if let Some(text) = line.strip_prefix("say(").and_then(|s| s.strip_suffix(')')) {
                ctx.write_stdout(&format!("{}\n", text))?;
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn in_process_sleep_is_charged_by_the_wall_clock() {
    // The in-process watchdog runs on wall-clock time, so a run that sleeps
    // past the per-test limit times out even though it used no CPU.
    let dir = tempfile::tempdir().unwrap();
    let cfg = GradingConfig {
        timeout: 2,
        run_tests_singly: true,
        abort_on_error: false,
        all_or_nothing: false,
        warn_if_passive_output: false,
        ..Default::default()
    };
    let session = GradingSession::new(Language::Python3, cfg, dir.path())
        .with_backend(Backend::InProcess(Arc::new(Sleeper)));
    let tests = vec![
        TestCase::new("nap(2500)\nsay(late)", "late\n"),
        TestCase::new("nap(100)\nsay(early)", "early\n"),
    ];
    let o = grade_with(&session, "", tests).await;
    assert!(!o.rows[0].is_correct);
    assert!(o.rows[0].got.contains("Time limit exceeded"), "{}", o.rows[0].got);
    assert!(o.rows[1].is_correct);
    assert_eq!(o.fraction, 0.5);
}

#[tokio::test]
async fn python_engine_behind_the_in_process_backend() {
    let dir = tempfile::tempdir().unwrap();
    let engine = PythonEngine::new("python3", dir.path());
    let session = GradingSession::new(Language::Python3, GradingConfig::default(), dir.path())
        .with_backend(Backend::InProcess(Arc::new(engine)));
    let answer = "def sqr(n):\n    \"\"\"Square of n.\"\"\"\n    return n * n\n";
    let tests = vec![
        TestCase::new("print(sqr(2))", "4\n"),
        TestCase::new("print(sqr(-3))", "9\n"),
    ];
    let o = grade_with(&session, answer, tests).await;
    assert_eq!(o.fraction, 1.0, "{:#?}", o);
    assert!(o.rows.iter().all(|r| r.is_correct));
}
