//! Failure taxonomy for session runs.
//!
//! Plumbing errors travel as `anyhow::Error`; these variants are attached at
//! the points where the runner has to decide what a failure means (abort the
//! invocation, abort one execution, or abort the rest of a requirements chain).
use std::path::PathBuf;

/// Errors detected before any external command runs. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{reason}")]
    ProjectFile { reason: String },

    #[error("session name {name:?} is declared more than once")]
    DuplicateSession { name: String },

    #[error("unknown session {name:?}")]
    UnknownSession { name: String },

    #[error("session {session:?} is parametrized over unknown axis {axis:?}")]
    UnknownAxis { session: String, axis: String },

    #[error("axis {axis:?} repeats the label {label:?}")]
    DuplicateAxisLabel { axis: String, label: String },

    #[error("axis {axis:?} has no values (bound by session {session:?})")]
    EmptyAxis { session: String, axis: String },

    #[error("session {session:?} declares no runtime and no default_runtime is set")]
    MissingRuntime { session: String },

    #[error("environment variable {var} is required for {mode} output")]
    MissingEnvVar { var: String, mode: &'static str },

    #[error("unknown backend {name:?} (expected uv, venv, or none)")]
    UnknownBackend { name: String },

    #[error("no backend in {chain:?} is available")]
    NoBackend { chain: String },

    #[error("invalid template {template:?}: {reason}")]
    Template { template: String, reason: String },

    #[error(
        "requirements entry {input} references {reference}, which is produced by a later entry"
    )]
    ChainOrder { input: PathBuf, reference: PathBuf },

    #[error("requirements output {output} is declared more than once")]
    DuplicateChainOutput { output: PathBuf },

    #[error("session {session:?} has a requirements step but no [[requirements]] entries")]
    EmptyChain { session: String },

    #[error("no sessions match the selection")]
    NothingSelected,
}

/// Failures that end a single execution without affecting its siblings.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("install failed: {0}")]
    Install(String),

    #[error("command failed: {command} ({status})")]
    StepFailure { command: String, status: String },

    #[error("requirements chain stopped at {input}: {reason}")]
    ChainFailure { input: PathBuf, reason: String },
}

/// Returns true when `err` (or anything it wraps) is a configuration error.
pub fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<ConfigError>().is_some())
}
