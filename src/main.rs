use clap::Parser;
use colored::*;
use std::process::ExitCode;

use shellmend::cli::{self, Cli};
use shellmend::config::{self, Config};
use shellmend::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = match cli.config.clone() {
        Some(path) => Ok(path),
        None => config::get_config_path(),
    };
    let config = match config_path.and_then(|path| Config::load_or_create(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let log_dir = config.log_dir().ok();
    let _guard = logging::init(&config.logging, log_dir.as_deref());

    match cli::run(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
