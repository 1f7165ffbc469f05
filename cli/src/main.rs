use std::io::Write as _;

use assess_cli::{cmd::GlobalArgs, render::ColorTheme};
use clap::Parser;
use colored::Colorize;

fn init_logger(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            let level = record.level();
            writeln!(
                buf,
                "[{}] {}",
                level.as_str().color(level.color()).bold(),
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() {
    let app = GlobalArgs::parse();
    init_logger(app.verbose);
    let code = app.exec_subcmd().await.unwrap_or_else(|e| {
        eprintln!("{}: {:?}", "Error".bright_red().bold(), e);
        1
    });
    std::process::exit(code);
}
