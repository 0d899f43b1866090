//! Output routing for the test step.
//!
//! The leading passthrough arguments pick one of three modes: a plain run, a
//! coverage run reported to the terminal, or a coverage run whose report is
//! appended to a CI-provided summary file.
use crate::command::CommandIo;
use crate::error::ConfigError;
use crate::session::CoverageConfig;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportMode {
    Plain,
    CoverageLocal,
    CoverageCi { summary: PathBuf },
}

impl ReportMode {
    pub fn is_coverage(&self) -> bool {
        !matches!(self, ReportMode::Plain)
    }
}

/// A test step with its mode decided and its arguments expanded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedTest {
    pub mode: ReportMode,
    pub program: String,
    /// Expanded step arguments (the test target).
    pub args: Vec<String>,
    /// Passthrough arguments left after the mode keywords.
    pub passthrough: Vec<String>,
    pub coverage: CoverageConfig,
}

/// Decide the mode from `posargs`. Returns the mode and the remaining
/// passthrough arguments.
///
/// CI mode requires `coverage.summary_env` to name a non-empty variable; a
/// missing one is reported here, before anything runs.
pub fn resolve_mode(
    coverage: &CoverageConfig,
    posargs: &[String],
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(ReportMode, Vec<String>), ConfigError> {
    if posargs.first() != Some(&coverage.trigger) {
        return Ok((ReportMode::Plain, posargs.to_vec()));
    }
    if posargs.get(1) == Some(&coverage.ci_trigger) {
        let summary = lookup(&coverage.summary_env)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar {
                var: coverage.summary_env.clone(),
                mode: "CI coverage",
            })?;
        return Ok((
            ReportMode::CoverageCi {
                summary: PathBuf::from(summary),
            },
            posargs[2..].to_vec(),
        ));
    }
    Ok((ReportMode::CoverageLocal, posargs[1..].to_vec()))
}

/// Run `test`, using `run` to launch each command. `run` receives the
/// program, its arguments, whether the step's environment variables apply,
/// and how stdout is wired.
pub fn run_routed(
    test: &RoutedTest,
    run: &mut dyn FnMut(&str, Vec<String>, bool, CommandIo) -> Result<()>,
) -> Result<()> {
    if test.mode == ReportMode::Plain {
        let mut args = test.passthrough.clone();
        args.extend(test.args.iter().cloned());
        return run(&test.program, args, true, CommandIo::Inherit);
    }

    let coverage = &test.coverage;
    let module = coverage.module.as_deref().unwrap_or(&test.program);
    let mut args = vec!["run".to_string()];
    args.extend(test.passthrough.iter().cloned());
    args.push("-m".to_string());
    args.push(module.to_string());
    args.extend(test.args.iter().cloned());
    run(&coverage.program, args, true, CommandIo::Inherit)?;

    match &test.mode {
        ReportMode::CoverageCi { summary } => {
            // Append only: the CI harness writes to the same file.
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(summary)
                .with_context(|| format!("open summary {}", summary.display()))?;
            writeln!(file, "{}\n", coverage.summary_header)
                .with_context(|| format!("write {}", summary.display()))?;
            // The header must land before the child's output.
            file.flush()
                .with_context(|| format!("flush {}", summary.display()))?;
            tracing::info!(summary = %summary.display(), "appending coverage report");
            run(
                &coverage.program,
                vec!["report".to_string(), "--format=markdown".to_string()],
                false,
                CommandIo::StdoutTo(file),
            )
        }
        _ => run(
            &coverage.program,
            vec!["report".to_string()],
            false,
            CommandIo::Inherit,
        ),
    }
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
