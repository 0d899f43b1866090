//! Session execution.
//!
//! Executions run one after another in selection order. Each acquires its
//! environment (provisioned on first use of its key), then runs its steps
//! until the first failure. A failure ends only its own execution unless
//! `fail_fast` is set, in which case everything still queued is skipped.
mod plan;

pub use plan::{plan_all, PlannedExecution, PlannedStep};

use crate::command::{CommandIo, CommandRunner, CommandSpec};
use crate::config::Project;
use crate::environment::{Environment, EnvironmentPool};
use crate::error::SessionError;
use crate::report::run_routed;
use crate::util::{display_path, tail_lines};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::time::Instant;

pub const REPORT_SCHEMA_VERSION: u32 = 1;
const FAILURE_TAIL_LINES: usize = 40;

/// Invocation-wide execution switches.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub fail_fast: bool,
    pub install_only: bool,
    pub error_on_missing_runtime: bool,
    pub reuse_existing: bool,
    /// Passthrough arguments given after `--`.
    pub posargs: Vec<String>,
    /// Backend chain that overrides every session's own.
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub name: String,
    pub runtime: String,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: u32,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    /// True when nothing failed. Skipped executions do not count as failures.
    pub fn success(&self) -> bool {
        self.results
            .iter()
            .all(|result| result.status != ExecutionStatus::Failed)
    }
}

enum Outcome {
    Completed,
    Skipped(String),
}

pub struct Executor<'a, R: CommandRunner> {
    project: &'a Project,
    options: &'a RunOptions,
    runner: &'a mut R,
    pool: EnvironmentPool,
}

impl<'a, R: CommandRunner> Executor<'a, R> {
    pub fn new(project: &'a Project, options: &'a RunOptions, runner: &'a mut R) -> Self {
        Self {
            project,
            options,
            runner,
            pool: EnvironmentPool::new(project.env_root.clone(), options.reuse_existing),
        }
    }

    /// Run every planned execution and collect their results.
    pub fn run(&mut self, plans: Vec<PlannedExecution>) -> RunReport {
        let mut results = Vec::with_capacity(plans.len());
        let mut aborted = false;
        for plan in plans {
            if aborted {
                results.push(ExecutionResult {
                    name: plan.name.clone(),
                    runtime: plan.runtime.clone(),
                    status: ExecutionStatus::Skipped,
                    reason: Some("fail-fast after an earlier failure".to_string()),
                    duration_ms: 0,
                });
                continue;
            }

            eprintln!("smx > Running session {}", plan.name);
            let started = Instant::now();
            let outcome = self.execute(&plan);
            plan.scratch.release();
            let (status, reason) = match outcome {
                Ok(Outcome::Completed) => (ExecutionStatus::Success, None),
                Ok(Outcome::Skipped(reason)) => {
                    eprintln!("smx > Session {} skipped: {reason}", plan.name);
                    (ExecutionStatus::Skipped, Some(reason))
                }
                Err(err) => {
                    eprintln!("smx > Session {} failed: {err:#}", plan.name);
                    (ExecutionStatus::Failed, Some(format!("{err:#}")))
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!(
                session = %plan.name,
                status = status.as_str(),
                duration_ms,
                "session finished"
            );
            if status == ExecutionStatus::Failed && self.options.fail_fast {
                aborted = true;
            }
            results.push(ExecutionResult {
                name: plan.name.clone(),
                runtime: plan.runtime.clone(),
                status,
                reason,
                duration_ms,
            });
        }
        RunReport {
            schema_version: REPORT_SCHEMA_VERSION,
            results,
        }
    }

    fn execute(&mut self, plan: &PlannedExecution) -> Result<Outcome> {
        tracing::debug!(
            session = %plan.name,
            tmpdir = %plan.scratch.path().display(),
            "session scratch directory"
        );
        plan.scratch.create()?;
        let environment = match self.pool.lookup(&plan.key) {
            Some(ready) => {
                tracing::info!(
                    session = %plan.name,
                    dir = %display_path(&ready.dir, Some(&self.project.root)),
                    "reusing environment"
                );
                ready.clone()
            }
            None => {
                let candidate = self.pool.environment_for(plan.key.clone());
                if let Some(interpreter) = candidate.required_interpreter() {
                    if !self.runner.program_available(&interpreter) {
                        let reason = format!("interpreter {interpreter} not found");
                        if self.options.error_on_missing_runtime {
                            return Err(SessionError::Install(reason).into());
                        }
                        return Ok(Outcome::Skipped(reason));
                    }
                }
                self.provision(plan, candidate)?
            }
        };
        if self.options.install_only {
            return Ok(Outcome::Completed);
        }

        let activation = environment.activation_env()?;
        for step in &plan.steps {
            self.run_step(&environment, &activation, step)?;
        }
        Ok(Outcome::Completed)
    }

    fn provision(
        &mut self,
        plan: &PlannedExecution,
        environment: Environment,
    ) -> Result<Environment> {
        let root = &self.project.root;
        tracing::info!(
            session = %plan.name,
            backend = plan.backend().as_str(),
            dir = %display_path(&environment.dir, Some(root)),
            "provisioning environment"
        );
        if self.pool.prepare(&environment)? {
            for command in environment.create_commands() {
                provision_command(&mut *self.runner, command.cwd(root))?;
            }
        }
        let tmp = environment.tmp_dir();
        fs::create_dir_all(&tmp).with_context(|| format!("create {}", tmp.display()))?;

        for packages in plan.installs.iter().filter(|packages| !packages.is_empty()) {
            match environment.install_command(packages) {
                Some(command) => provision_command(&mut *self.runner, command.cwd(root))?,
                None => tracing::warn!(
                    session = %plan.name,
                    packages = %packages.join(" "),
                    "backend none cannot install packages; skipping"
                ),
            }
        }
        self.pool.mark_ready(environment.clone());
        Ok(environment)
    }

    fn run_step(
        &mut self,
        environment: &Environment,
        activation: &BTreeMap<String, String>,
        step: &PlannedStep,
    ) -> Result<()> {
        let project = self.project;
        let runner = &mut *self.runner;
        match step {
            PlannedStep::Run {
                program,
                args,
                env,
                stdout,
            } => {
                let io = match stdout {
                    Some(path) => CommandIo::StdoutTo(open_append(path)?),
                    None => CommandIo::Inherit,
                };
                let command = CommandSpec::new(environment.resolve_program(program))
                    .args(args.iter().cloned())
                    .envs(activation.clone())
                    .envs(env.clone())
                    .cwd(&project.root)
                    .io(io);
                launch(runner, command)
            }
            PlannedStep::Test { test, env } => run_routed(
                test,
                &mut |program: &str,
                      args: Vec<String>,
                      with_step_env: bool,
                      io: CommandIo|
                 -> Result<()> {
                    let mut command = CommandSpec::new(environment.resolve_program(program))
                        .args(args)
                        .envs(activation.clone())
                        .cwd(&project.root)
                        .io(io);
                    if with_step_env {
                        command = command.envs(env.clone());
                    }
                    launch(&mut *runner, command)
                },
            ),
            PlannedStep::Requirements { resolver, args } => {
                let count = project.chain.regenerate(
                    resolver,
                    args,
                    &mut |program: &str, args: Vec<String>| -> Result<()> {
                        let command = CommandSpec::new(environment.resolve_program(program))
                            .args(args)
                            .envs(activation.clone())
                            .cwd(&project.root);
                        launch(&mut *runner, command)
                    },
                )?;
                tracing::info!(count, "requirements regenerated");
                Ok(())
            }
        }
    }
}

/// Run a body command with inherited output. Any failure is a step failure.
fn launch<R: CommandRunner + ?Sized>(runner: &mut R, command: CommandSpec) -> Result<()> {
    let display = command.display();
    eprintln!("smx > {display}");
    let output = runner
        .execute(command)
        .map_err(|err| SessionError::StepFailure {
            command: display.clone(),
            status: format!("{err:#}"),
        })?;
    if !output.success() {
        return Err(SessionError::StepFailure {
            command: display,
            status: output.status_string(),
        }
        .into());
    }
    Ok(())
}

/// Run an environment creation or install command with captured output,
/// replaying the tail of that output only when it fails.
fn provision_command<R: CommandRunner + ?Sized>(runner: &mut R, command: CommandSpec) -> Result<()> {
    let display = command.display();
    eprintln!("smx > {display}");
    let output = runner
        .execute(command.io(CommandIo::Capture))
        .map_err(|err| SessionError::Install(format!("{display}: {err:#}")))?;
    if !output.success() {
        let mut captured = output.stdout.clone();
        captured.push_str(&output.stderr);
        let tail = tail_lines(&captured, FAILURE_TAIL_LINES);
        if !tail.is_empty() {
            eprintln!("{tail}");
        }
        return Err(SessionError::Install(format!("{display} ({})", output.status_string())).into());
    }
    Ok(())
}

fn open_append(path: &Path) -> Result<fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {} for append", path.display()))
}
