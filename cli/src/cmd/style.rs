use std::path::PathBuf;
use std::sync::Arc;

use assess_core::{lang::ProgramBuilder, style::StyleChecker};
use colored::Colorize as _;
use serde_json::Map;

use super::{ArgLanguage, GlobalArgs, SubcmdResult};
use crate::{
    config::{self, GlobalConfig, Job},
    util,
};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Source file to check ('-' for stdin)
    #[arg()] // positional argument
    pub source: PathBuf,

    #[arg(short, long)]
    pub language: Option<ArgLanguage>,

    /// JSON object of grading parameters
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

pub async fn exec(args: &Args, global_args: &GlobalArgs) -> SubcmdResult {
    let gcfg = GlobalConfig::from_args(global_args);
    let project = config::load_project()?;

    let language = match args.language {
        Some(lang) => lang.into(),
        None => Job::default().language(&project, Some(args.source.as_path()))?,
    };
    let params = match &args.config {
        Some(path) => config::read_params(path)?,
        None => Map::new(),
    };
    let cfg = Arc::new(project.grading_config(&params)?);
    let program = ProgramBuilder::new(language, Arc::clone(&cfg), &util::read_input(&args.source)?);

    let work_dir = gcfg.work_dir();
    fsutil::mkdir_all(&work_dir)?;
    let res = StyleChecker::new(language, &cfg, &work_dir)
        .check(program.prelude(), program.answer())
        .await;
    if let Err(e) = fsutil::remove_dir_all(&work_dir) {
        log::warn!("{}", e);
    }

    let violations = res?;
    if violations.is_empty() {
        println!("{}", "No style problems found".green());
        return Ok(0);
    }
    for v in &violations {
        println!("{}", v.bright_red());
    }
    Ok(1)
}
