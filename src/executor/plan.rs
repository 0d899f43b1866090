//! Planning: everything that can fail for configuration reasons is decided
//! here, before the first external command starts.
use super::RunOptions;
use crate::command::CommandRunner;
use crate::config::Project;
use crate::environment::{resolve_backend_with, Backend, EnvKey, Environment};
use crate::error::ConfigError;
use crate::report::{resolve_mode, ReportMode, RoutedTest};
use crate::session::{ConcreteSession, RunStep, Step, TestStep};
use crate::template::TemplateContext;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// One concrete execution with every template expanded.
#[derive(Debug)]
pub struct PlannedExecution {
    pub name: String,
    pub runtime: String,
    pub key: EnvKey,
    /// Install commands' package lists, in declared order.
    pub installs: Vec<Vec<String>>,
    pub steps: Vec<PlannedStep>,
    pub scratch: Scratch,
}

/// The directory behind `{tmpdir}`.
///
/// Its path is fixed at planning time under a run-wide temporary root, but
/// the directory itself only exists while its execution runs.
#[derive(Debug, Clone)]
pub struct Scratch {
    _root: Arc<TempDir>,
    path: PathBuf,
}

impl Scratch {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("create scratch directory {}", self.path.display()))
    }

    pub fn release(&self) {
        if !self.path.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "could not remove scratch directory"
            );
        }
    }
}

impl PlannedExecution {
    pub fn backend(&self) -> Backend {
        self.key.backend
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedStep {
    Run {
        program: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        /// Append stdout here instead of inheriting it.
        stdout: Option<PathBuf>,
    },
    Test {
        test: RoutedTest,
        env: BTreeMap<String, String>,
    },
    Requirements {
        resolver: Vec<String>,
        args: Vec<String>,
    },
}

/// Plan every selected execution. `lookup` reads process environment
/// variables.
pub fn plan_all<R: CommandRunner + ?Sized>(
    project: &Project,
    sessions: &[ConcreteSession],
    options: &RunOptions,
    runner: &R,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Vec<PlannedExecution>> {
    let scratch_root = Arc::new(
        tempfile::Builder::new()
            .prefix("smx-")
            .tempdir()
            .context("create scratch root")?,
    );
    let mut plans = Vec::with_capacity(sessions.len());
    for (idx, session) in sessions.iter().enumerate() {
        let scratch = Scratch {
            _root: Arc::clone(&scratch_root),
            path: scratch_root.path().join(idx.to_string()),
        };
        let plan = plan_one(project, session, options, runner, lookup, scratch)
            .with_context(|| format!("plan session {}", session.name))?;
        plans.push(plan);
    }
    let uses_chain = plans.iter().any(|plan| {
        plan.steps
            .iter()
            .any(|step| matches!(step, PlannedStep::Requirements { .. }))
    });
    if uses_chain {
        project.chain.check_order(&project.root)?;
    }
    tracing::debug!(count = plans.len(), "planned executions");
    Ok(plans)
}

fn plan_one<R: CommandRunner + ?Sized>(
    project: &Project,
    session: &ConcreteSession,
    options: &RunOptions,
    runner: &R,
    lookup: &dyn Fn(&str) -> Option<String>,
    scratch: Scratch,
) -> Result<PlannedExecution> {
    let definition = &session.definition;
    let chain = options
        .backend
        .as_deref()
        .or(definition.backend.as_deref())
        .unwrap_or(&project.backend);
    let backend = resolve_backend_with(chain, |backend| match backend {
        Backend::Uv => runner.program_available("uv"),
        Backend::Venv | Backend::None => true,
    })?;
    let steps: Vec<&Step> = definition
        .steps
        .iter()
        .filter(|step| !matches!(step.backend(), Some(only) if only != backend))
        .collect();

    // The environment is not known until the dependency set is.
    let mut ctx = TemplateContext {
        root: &project.root,
        tmpdir: scratch.path(),
        envdir: None,
        envtmp: None,
        runtime: &session.runtime,
        session: &session.name,
        combination: &session.combination,
    };
    let mut installs = Vec::new();
    for step in &steps {
        if let Step::Install(install) = step {
            installs.push(ctx.expand_args(&install.packages, &[])?);
        }
    }

    let mut routed = Vec::new();
    for step in &steps {
        if let Step::Test(test) = step {
            let (mode, passthrough) = resolve_mode(&test.coverage, &options.posargs, lookup)?;
            if mode.is_coverage() && !test.coverage.install.is_empty() {
                installs.push(ctx.expand_args(&test.coverage.install, &[])?);
            }
            routed.push((mode, passthrough));
        }
    }

    let dependencies: Vec<String> = installs.iter().flatten().cloned().collect();
    let key = EnvKey::new(backend, &session.runtime, &dependencies);
    let environment = Environment::new(&project.env_root, key.clone());
    let envtmp = environment.tmp_dir();
    ctx.envdir = Some(environment.dir.as_path());
    ctx.envtmp = Some(envtmp.as_path());

    let mut routed = routed.into_iter();
    let mut planned = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            Step::Install(_) => {}
            Step::Run(run) => planned.push(plan_run(&ctx, run, &options.posargs)?),
            Step::Test(test) => {
                let Some((mode, passthrough)) = routed.next() else {
                    continue;
                };
                planned.push(plan_test(&ctx, test, mode, passthrough)?);
            }
            Step::Requirements(requirements) => {
                if project.chain.is_empty() {
                    return Err(ConfigError::EmptyChain {
                        session: definition.name.clone(),
                    }
                    .into());
                }
                planned.push(PlannedStep::Requirements {
                    resolver: ctx.expand_args(&requirements.resolver, &[])?,
                    args: ctx.expand_args(&requirements.args, &options.posargs)?,
                });
            }
        }
    }

    Ok(PlannedExecution {
        name: session.name.clone(),
        runtime: session.runtime.clone(),
        key,
        installs,
        steps: planned,
        scratch,
    })
}

fn plan_run(
    ctx: &TemplateContext<'_>,
    run: &RunStep,
    posargs: &[String],
) -> Result<PlannedStep, ConfigError> {
    let posargs = match (&run.posargs_default, posargs.is_empty()) {
        (Some(fallback), true) => ctx.expand_args(fallback, &[])?,
        _ => posargs.to_vec(),
    };
    let stdout = match &run.stdout {
        Some(path) => Some(ctx.root.join(ctx.expand(path)?)),
        None => None,
    };
    Ok(PlannedStep::Run {
        program: ctx.expand(&run.program)?,
        args: ctx.expand_args(&run.args, &posargs)?,
        env: expand_env(ctx, &run.env)?,
        stdout,
    })
}

fn plan_test(
    ctx: &TemplateContext<'_>,
    test: &TestStep,
    mode: ReportMode,
    passthrough: Vec<String>,
) -> Result<PlannedStep, ConfigError> {
    Ok(PlannedStep::Test {
        test: RoutedTest {
            mode,
            program: ctx.expand(&test.program)?,
            args: ctx.expand_args(&test.args, &[])?,
            passthrough,
            coverage: test.coverage.clone(),
        },
        env: expand_env(ctx, &test.env)?,
    })
}

fn expand_env(
    ctx: &TemplateContext<'_>,
    env: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ConfigError> {
    env.iter()
        .map(|(key, value)| ctx.expand(value).map(|expanded| (key.clone(), expanded)))
        .collect()
}
