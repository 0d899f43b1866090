//! CLI argument parsing.
//!
//! The CLI stays thin: it maps flags onto a selection request and run options
//! and leaves every decision to the workflow functions.
use crate::config::DEFAULT_PROJECT_FILE;
use crate::executor::RunOptions;
use crate::selector::SelectionRequest;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "smx",
    version,
    about = "Run declared project maintenance sessions in isolated environments",
    after_help = "Examples:\n  smx list\n  smx run\n  smx run tests-3.12 style\n  smx run -t docs\n  smx run tests -- coverage github\n  smx run requirements",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Project file declaring the sessions
    #[arg(short = 'f', long = "file", value_name = "PATH", global = true, default_value = DEFAULT_PROJECT_FILE)]
    pub file: PathBuf,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    List(ListArgs),
}

/// Run command inputs.
#[derive(Parser, Debug)]
#[command(about = "Run the default sessions, or the ones named or tagged")]
pub struct RunArgs {
    /// Session names: base, runtime-qualified, label-qualified, or exact
    #[arg(value_name = "SESSION")]
    pub sessions: Vec<String>,

    /// Also run sessions carrying this tag
    #[arg(short = 't', long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Only run executions targeting this runtime
    #[arg(long, value_name = "RUNTIME")]
    pub runtime: Option<String>,

    /// Backend chain overriding the project's, e.g. "venv" or "uv|venv"
    #[arg(long, value_name = "CHAIN")]
    pub backend: Option<String>,

    /// Keep environments left by a previous invocation instead of recreating them
    #[arg(short = 'r', long)]
    pub reuse_existing: bool,

    /// Skip every remaining session after the first failure
    #[arg(short = 'x', long)]
    pub fail_fast: bool,

    /// Provision environments without running session steps
    #[arg(long)]
    pub install_only: bool,

    /// Fail sessions whose interpreter is missing instead of skipping them
    #[arg(long)]
    pub error_on_missing_runtime: bool,

    /// Write a JSON run report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Arguments forwarded to session steps
    #[arg(last = true, value_name = "POSARGS")]
    pub posargs: Vec<String>,
}

impl RunArgs {
    pub fn selection(&self) -> SelectionRequest {
        SelectionRequest {
            names: self.sessions.clone(),
            tags: self.tags.clone(),
            runtime: self.runtime.clone(),
        }
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            fail_fast: self.fail_fast,
            install_only: self.install_only,
            error_on_missing_runtime: self.error_on_missing_runtime,
            reuse_existing: self.reuse_existing,
            posargs: self.posargs.clone(),
            backend: self.backend.clone(),
        }
    }
}

/// List command inputs.
#[derive(Parser, Debug)]
#[command(about = "List declared sessions")]
pub struct ListArgs {
    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posargs_follow_double_dash() {
        let args = RootArgs::try_parse_from([
            "smx", "run", "tests", "-t", "docs", "-x", "--", "coverage", "github",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.sessions, vec!["tests"]);
        assert_eq!(run.tags, vec!["docs"]);
        assert!(run.fail_fast);
        assert_eq!(run.posargs, vec!["coverage", "github"]);
        assert_eq!(args.file, PathBuf::from(DEFAULT_PROJECT_FILE));
    }

    #[test]
    fn global_file_flag_works_after_subcommand() {
        let args = RootArgs::try_parse_from(["smx", "list", "--json", "-f", "demo/smx.toml", "-vv"])
            .unwrap();
        assert_eq!(args.file, PathBuf::from("demo/smx.toml"));
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Command::List(ListArgs { json: true })));
    }
}
