//! fanout - run one shell command across a fleet of managed instances.

mod cli;
mod commands;
mod history;
mod output;
mod targets;

use clap::Parser;
use cli::{Cli, Command};
use colored::Colorize;
use fanout_common::config::FanoutConfig;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red(), err);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(cli.log.as_deref().unwrap_or(&config.general.log_level));

    let outcome = match &cli.command {
        Command::Run(args) => commands::run::run(&config, args).await,
        Command::History(args) => commands::history::run(&config, args).map(|()| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        // The batch ran but some targets did not succeed.
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red(), err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<FanoutConfig> {
    match &cli.config {
        Some(path) => FanoutConfig::load_from(path),
        None => FanoutConfig::load(),
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
