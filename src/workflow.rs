//! Command workflows behind the CLI.
use crate::cli::{ListArgs, RunArgs};
use crate::command::SystemRunner;
use crate::config::{load_project, Project};
use crate::error::ConfigError;
use crate::executor::{plan_all, Executor, RunReport};
use crate::selector::select;
use crate::session::{expand, SessionDefinition};
use crate::util::{display_path, write_json};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

/// Load the project file, reporting any failure as a configuration error.
pub fn open_project(path: &Path) -> Result<Project> {
    load_project(path).map_err(|err| {
        ConfigError::ProjectFile {
            reason: format!("{err:#}"),
        }
        .into()
    })
}

/// Select, plan, and run sessions. Selection and planning errors propagate
/// before anything runs; session failures only affect the exit code.
pub fn run_sessions(project: &Project, args: &RunArgs) -> Result<ExitCode> {
    let sessions = select(&project.registry, &args.selection())?;
    let options = args.options();
    let mut runner = SystemRunner;
    let lookup = |name: &str| std::env::var(name).ok();
    let plans = plan_all(project, &sessions, &options, &runner, &lookup)?;
    tracing::info!(count = plans.len(), "running sessions");

    let report = Executor::new(project, &options, &mut runner).run(plans);
    eprint!("{}", summary(&report));
    if let Some(path) = &args.report {
        write_json(path, &report)?;
        tracing::info!(path = %path.display(), "wrote run report");
    }
    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// One `* name: status (reason)` line per execution.
pub fn summary(report: &RunReport) -> String {
    let mut out = String::from("smx > Ran sessions:\n");
    for result in &report.results {
        out.push_str(&format!("* {}: {}", result.name, result.status.as_str()));
        if let Some(reason) = &result.reason {
            out.push_str(&format!(" ({reason})"));
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Serialize)]
struct ListEntry {
    name: String,
    session: String,
    runtime: Option<String>,
    default: bool,
    tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    empty_axis: Option<String>,
}

/// Print every declared session with its concrete executions.
pub fn list_sessions(project: &Project, project_file: &Path, args: &ListArgs) -> Result<()> {
    let entries = list_entries(project)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let text = serde_json::to_string_pretty(&entries).context("serialize session list")?;
        writeln!(out, "{text}").context("write session list")?;
        return Ok(());
    }

    let cwd = std::env::current_dir().ok();
    writeln!(
        out,
        "Sessions defined in {}:\n",
        display_path(project_file, cwd.as_deref())
    )
    .context("write session list")?;
    for entry in &entries {
        let marker = if entry.default { '*' } else { '-' };
        let mut line = format!("{marker} {}", entry.name);
        if let Some(description) = &entry.description {
            line.push_str(&format!(" -> {description}"));
        }
        if let Some(axis) = &entry.empty_axis {
            line.push_str(&format!(" [axis {axis:?} has no values]"));
        }
        writeln!(out, "{line}").context("write session list")?;
    }
    writeln!(
        out,
        "\nsessions marked with * are selected by default, sessions marked with - are skipped"
    )
    .context("write session list")?;
    if !project.chain.is_empty() {
        writeln!(out, "\nrequirements regenerated in order:").context("write session list")?;
        for (idx, entry) in project.chain.entries().iter().enumerate() {
            writeln!(
                out,
                "  {}. {} -> {}",
                idx + 1,
                entry.input.display(),
                entry.output.display()
            )
            .context("write session list")?;
        }
    }
    Ok(())
}

fn list_entries(project: &Project) -> Result<Vec<ListEntry>> {
    let mut entries = Vec::new();
    for definition in project.registry.sessions() {
        if let Some(axis) = definition.empty_axis() {
            entries.push(entry_for(definition, definition.name.clone(), None, Some(axis)));
            continue;
        }
        for session in expand(definition)? {
            entries.push(entry_for(
                definition,
                session.name,
                Some(session.runtime),
                None,
            ));
        }
    }
    Ok(entries)
}

fn entry_for(
    definition: &SessionDefinition,
    name: String,
    runtime: Option<String>,
    empty_axis: Option<&str>,
) -> ListEntry {
    ListEntry {
        name,
        session: definition.name.clone(),
        runtime,
        default: definition.default,
        tags: definition.tags.clone(),
        description: definition.description.clone(),
        empty_axis: empty_axis.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_project;
    use crate::executor::{ExecutionResult, ExecutionStatus, REPORT_SCHEMA_VERSION};
    use tempfile::TempDir;

    fn result(name: &str, status: ExecutionStatus, reason: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            name: name.to_string(),
            runtime: "3.13".to_string(),
            status,
            reason: reason.map(str::to_string),
            duration_ms: 5,
        }
    }

    #[test]
    fn summary_lists_each_execution_with_reasons() {
        let report = RunReport {
            schema_version: REPORT_SCHEMA_VERSION,
            results: vec![
                result("style", ExecutionStatus::Success, None),
                result(
                    "tests-3.12",
                    ExecutionStatus::Skipped,
                    Some("interpreter python3.12 not found"),
                ),
                result("docs[man]", ExecutionStatus::Failed, Some("command failed")),
            ],
        };
        assert_eq!(
            summary(&report),
            "smx > Ran sessions:\n\
             * style: success\n\
             * tests-3.12: skipped (interpreter python3.12 not found)\n\
             * docs[man]: failed (command failed)\n"
        );
    }

    #[test]
    fn list_flags_empty_axes_and_expands_the_rest() {
        let text = r#"
backend = "none"
default_runtime = "3.13"

[axes.benchmark]
files = { dir = "benchmarks", extension = "py" }

[[session]]
name = "style"
description = "Check style."

[[session]]
name = "bench"
default = false
parametrize = ["benchmark"]
"#;
        let root = TempDir::new().expect("tempdir");
        let project = parse_project(text, root.path()).expect("parse project");
        let entries = list_entries(&project).expect("list entries");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "style");
        assert_eq!(entries[0].runtime.as_deref(), Some("3.13"));
        assert!(entries[0].default);
        assert_eq!(entries[1].name, "bench");
        assert!(!entries[1].default);
        assert_eq!(entries[1].empty_axis.as_deref(), Some("benchmark"));
    }

    #[test]
    fn open_project_failures_are_config_errors() {
        let root = TempDir::new().expect("tempdir");
        let err = open_project(&root.path().join("missing.toml")).unwrap_err();
        assert!(crate::error::is_config_error(&err));
    }
}
