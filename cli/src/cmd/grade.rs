use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use assess_core::lang::Language;
use assess_core::sandbox::{Backend, PythonEngine};
use assess_core::{GradingSession, Outcome, Submission, TestCase, Tester};
use serde_json::Value;

use super::{ArgBackend, ArgLanguage, GlobalArgs, SubcmdResult};
use crate::{
    config::{self, GlobalConfig, Job},
    render, util,
};

#[derive(Debug, Default, clap::Args)]
pub struct Args {
    /// Job file: {"language", "answer", "tests", "config", "is_precheck", "author_answer"}
    #[arg()] // positional argument
    pub job_file: Option<PathBuf>,

    /// Answer source file ('-' for stdin), replacing the job's answer
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// JSON array of tests, replacing the job's tests
    #[arg(short, long)]
    pub tests: Option<PathBuf>,

    /// JSON object of grading parameters, merged over the job's
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub language: Option<ArgLanguage>,

    /// Where candidate code runs: a limited child process per run, or
    /// python3 under an interposed sandbox (Python 3 only)
    #[arg(short, long, value_enum, default_value_t)]
    pub backend: ArgBackend,

    /// Grade as a precheck
    #[arg(short = 'P', long)]
    pub precheck: bool,

    /// Sample answer whose output fills in missing expected values
    #[arg(short = 'A', long)]
    pub author_answer: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(short, long)]
    pub json: bool,

    /// Also print rows the student would not see
    #[arg(long)]
    pub show_hidden: bool,

    /// Leave the scratch directory behind
    #[arg(long)]
    pub keep_work_dir: bool,
}

impl Args {
    /// The job file (if any) with the command line flags laid over it.
    pub fn load_job(&self) -> anyhow::Result<Job> {
        let mut job = match &self.job_file {
            Some(path) => Job::from_file(path)?,
            None => Job::default(),
        };
        if let Some(path) = &self.source {
            job.answer = util::read_input(path)?;
        }
        if let Some(path) = &self.tests {
            job.tests = fsutil::read_json_with_deserialize::<_, Vec<Value>>(path)
                .context("Failed to load tests")?;
        }
        if let Some(path) = &self.config {
            job.config.extend(config::read_params(path)?);
        }
        if let Some(path) = &self.author_answer {
            job.author_answer = Some(fsutil::read_to_string(path)?);
        }
        job.is_precheck |= self.precheck;
        Ok(job)
    }
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let gcfg = GlobalConfig::from_args(global_args);
    let project = config::load_project()?;
    let job = args.load_job()?;

    let language = match args.language {
        Some(lang) => lang.into(),
        None => job.language(&project, args.source.as_deref())?,
    };
    let cfg = project.grading_config(&job.config)?;
    let tests = job.test_cases()?;
    log::info!("Grading a {:?} answer against {} tests", language, tests.len());

    let work_dir = gcfg.work_dir();
    let backend = self::backend(args.backend, language, &work_dir)?;
    fsutil::mkdir_all(&work_dir)?;
    let session = GradingSession::new(language, cfg, work_dir.clone())
        .with_toolchain(project.toolchain_for(language))
        .with_backend(backend);

    let res = self::grade(&session, job, tests).await;

    if args.keep_work_dir {
        log::info!("Scratch files kept in {:?}", util::replace_homedir_to_tilde(&work_dir));
    } else if let Err(e) = fsutil::remove_dir_all(&work_dir) {
        log::warn!("{}", e);
    }

    let outcome = res?;
    if args.json {
        serde_json::to_writer_pretty(io::stdout(), &outcome)?;
        println!();
    } else {
        render::print_outcome(&outcome, args.show_hidden);
    }
    Ok(if outcome.is_perfect() { 0 } else { 1 })
}

fn backend(choice: ArgBackend, language: Language, work_dir: &Path) -> anyhow::Result<Backend> {
    match choice {
        ArgBackend::Subprocess => Ok(Backend::Subprocess),
        ArgBackend::InProcess if language == Language::Python3 => Ok(Backend::InProcess(Arc::new(
            PythonEngine::new("python3", work_dir),
        ))),
        ArgBackend::InProcess => Err(anyhow::anyhow!(
            "The in-process backend cannot run {} code",
            language
        )),
    }
}

async fn grade(session: &GradingSession, job: Job, tests: Vec<TestCase>) -> anyhow::Result<Outcome> {
    let mut tester = Tester::new(
        session,
        Submission {
            answer: job.answer,
            tests,
            is_precheck: job.is_precheck,
        },
    );
    if let Some(author) = &job.author_answer {
        tester = tester.with_author_answer(author).await?;
    }
    Ok(tester.test_code().await?)
}
