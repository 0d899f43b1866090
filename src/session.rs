//! Session definitions and their steps.
//!
//! A definition is immutable once registered. Concrete executions are derived
//! from it on demand by crossing its runtimes with its parameter axes.
use crate::environment::Backend;
use crate::error::ConfigError;
use crate::matrix::{self, Combination, ParameterAxis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A named, independently runnable workflow.
#[derive(Debug, Clone)]
pub struct SessionDefinition {
    /// Resolved name: the explicit display name when one was given.
    pub name: String,
    pub description: Option<String>,
    pub runtimes: Vec<String>,
    pub default: bool,
    pub tags: BTreeSet<String>,
    pub axes: Vec<ParameterAxis>,
    /// Backend chain override, e.g. `"uv|venv"`.
    pub backend: Option<String>,
    pub steps: Vec<Step>,
}

impl SessionDefinition {
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|tag| self.tags.contains(tag))
    }

    /// Name of the first bound axis that has no values, if any.
    pub fn empty_axis(&self) -> Option<&str> {
        self.axes
            .iter()
            .find(|axis| axis.values.is_empty())
            .map(|axis| axis.name.as_str())
    }
}

/// Explode a definition into its concrete executions.
///
/// Runtimes vary slowest; the runtime suffix only appears when the definition
/// targets more than one runtime.
pub fn expand(definition: &Arc<SessionDefinition>) -> Result<Vec<ConcreteSession>, ConfigError> {
    let combos = matrix::expand(&definition.name, &definition.axes)?;
    let qualify = definition.runtimes.len() > 1;
    let mut out = Vec::with_capacity(definition.runtimes.len() * combos.len());
    for runtime in &definition.runtimes {
        let runtime_name = if qualify {
            format!("{}-{}", definition.name, runtime)
        } else {
            definition.name.clone()
        };
        for combo in &combos {
            let suffix = combo.suffix();
            out.push(ConcreteSession {
                definition: Arc::clone(definition),
                runtime: runtime.clone(),
                name: format!("{runtime_name}{suffix}"),
                label_name: format!("{}{suffix}", definition.name),
                runtime_name: runtime_name.clone(),
                combination: combo.clone(),
            });
        }
    }
    Ok(out)
}

/// One runnable unit: a definition bound to a runtime and a parameter point.
#[derive(Debug, Clone)]
pub struct ConcreteSession {
    pub definition: Arc<SessionDefinition>,
    pub runtime: String,
    pub combination: Combination,
    /// Full name, e.g. `tests-3.12[format]`.
    pub name: String,
    /// Name without parameter labels, e.g. `tests-3.12`.
    pub runtime_name: String,
    /// Name without runtime qualifier, e.g. `tests[format]`.
    pub label_name: String,
}

impl ConcreteSession {
    /// Whether a user-supplied selector names this execution.
    pub fn matches(&self, selector: &str) -> bool {
        selector == self.definition.name
            || selector == self.runtime_name
            || selector == self.label_name
            || selector == self.name
    }
}

/// A body step as declared in the project file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Install(InstallStep),
    Run(RunStep),
    Test(TestStep),
    Requirements(RequirementsStep),
}

impl Step {
    /// Backend this step is restricted to, if any.
    pub fn backend(&self) -> Option<Backend> {
        match self {
            Step::Install(step) => step.backend,
            Step::Run(step) => step.backend,
            Step::Test(step) => step.backend,
            Step::Requirements(step) => step.backend,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstallStep {
    pub packages: Vec<String>,
    #[serde(default)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Used for `{posargs}` when no passthrough arguments were given.
    #[serde(default)]
    pub posargs_default: Option<Vec<String>>,
    /// Append stdout to this file instead of inheriting it.
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub backend: Option<Backend>,
}

/// Test command whose output is routed by the leading passthrough arguments.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TestStep {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoverageConfig {
    pub program: String,
    /// Module run under instrumentation; defaults to the test program.
    pub module: Option<String>,
    pub install: Vec<String>,
    pub trigger: String,
    pub ci_trigger: String,
    pub summary_env: String,
    pub summary_header: String,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            program: "coverage".to_string(),
            module: None,
            install: vec!["coverage[toml]".to_string()],
            trigger: "coverage".to_string(),
            ci_trigger: "github".to_string(),
            summary_env: "GITHUB_STEP_SUMMARY".to_string(),
            summary_header: "### Coverage".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementsStep {
    pub resolver: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub backend: Option<Backend>,
}
