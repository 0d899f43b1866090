mod cli;
mod command;
mod config;
mod environment;
mod error;
mod executor;
mod matrix;
mod registry;
mod report;
mod requirements;
mod selector;
mod session;
mod template;
mod util;
mod workflow;

use anyhow::Result;
use clap::Parser;
use cli::{Command, RootArgs};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SMX_LOG";
/// Exit status for configuration and usage errors, matching clap's.
const CONFIG_EXIT: u8 = 2;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.verbose);

    match dispatch(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("smx > error: {err:#}");
            if error::is_config_error(&err) {
                ExitCode::from(CONFIG_EXIT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn dispatch(args: RootArgs) -> Result<ExitCode> {
    let project = workflow::open_project(&args.file)?;
    match args.command {
        Command::Run(run) => workflow::run_sessions(&project, &run),
        Command::List(list) => {
            workflow::list_sessions(&project, &args.file, &list)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
