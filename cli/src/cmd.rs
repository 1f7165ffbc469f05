pub mod config;
pub mod grade;
pub mod style;

use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(author, version, about, long_about = None)]
pub struct GlobalArgs {
    #[command(subcommand)]
    pub subcmd: Subcommand,

    /// Directory for scratch files of the runs [default: user cache dir]
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// More log output (-v: info, -vv: debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Grade a submission against its tests
    #[command(alias("g"))]
    Grade(grade::Args),

    /// Run only the style checks over a source file
    #[command(alias("s"))]
    Style(style::Args),

    /// Show the effective grading configuration
    Config(config::Args),
}

/// Process exit status on success.
pub type SubcmdResult = anyhow::Result<i32>;

impl GlobalArgs {
    pub async fn exec_subcmd(&self) -> SubcmdResult {
        use Subcommand::*;
        match &self.subcmd {
            Grade(args) => grade::exec(args, self).await,
            Style(args) => style::exec(args, self).await,
            Config(args) => config::exec(args, self),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum ArgLanguage {
    Python3,
    C,
    Cpp,
}

impl From<ArgLanguage> for assess_core::lang::Language {
    fn from(value: ArgLanguage) -> Self {
        use assess_core::lang::Language;
        use ArgLanguage::*;
        match value {
            Python3 => Language::Python3,
            C => Language::C,
            Cpp => Language::Cpp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
#[clap(rename_all = "lower")]
pub enum ArgBackend {
    #[default]
    Subprocess,
    InProcess,
}
