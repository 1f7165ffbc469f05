use std::path::PathBuf;

use anyhow::anyhow;
use assess_core::config::ProjectConfig;
use serde_json::Map;

use super::{GlobalArgs, SubcmdResult};
use crate::{config, util};

#[derive(Debug, clap::Args)]
pub struct Args {
    /// Print an example project file instead
    #[arg(long)]
    pub example: bool,

    /// JSON object of grading parameters merged over the project's
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print as JSON instead of TOML
    #[arg(short, long)]
    pub json: bool,
}

pub fn exec(args: &Args, _global_args: &GlobalArgs) -> SubcmdResult {
    if args.example {
        let toml = ProjectConfig::example_toml()
            .ok_or_else(|| anyhow!("The example {} is not bundled", ProjectConfig::FILENAME))?;
        print!("{}", toml);
        return Ok(0);
    }

    let project = config::load_project()?;
    if let Some(path) = &project.source_config_file {
        eprintln!("# {:?}", util::replace_homedir_to_tilde(path));
    }
    let params = match &args.config {
        Some(path) => config::read_params(path)?,
        None => Map::new(),
    };
    let cfg = project.grading_config(&params)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
    } else {
        print!("{}", toml::to_string_pretty(&cfg)?);
    }
    Ok(0)
}
