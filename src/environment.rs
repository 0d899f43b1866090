//! Isolated per-session environments.
//!
//! An environment is keyed by backend, runtime, and the digest of the
//! dependency set installed into it. Within one invocation a key is
//! provisioned at most once; later executions sharing it reuse it as-is.
use crate::command::CommandSpec;
use crate::error::ConfigError;
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How environments are created and populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Uv,
    Venv,
    /// No isolation: commands run against the host, installs are skipped.
    None,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Uv => "uv",
            Backend::Venv => "venv",
            Backend::None => "none",
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "uv" => Ok(Backend::Uv),
            "venv" | "virtualenv" => Ok(Backend::Venv),
            "none" => Ok(Backend::None),
            other => Err(ConfigError::UnknownBackend {
                name: other.to_string(),
            }),
        }
    }
}

/// Pick the first usable backend from a `|`-separated chain such as `uv|venv`.
pub fn resolve_backend_with(
    chain: &str,
    available: impl Fn(Backend) -> bool,
) -> Result<Backend, ConfigError> {
    let candidates = chain
        .split('|')
        .map(Backend::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    candidates
        .iter()
        .copied()
        .find(|backend| available(*backend))
        .ok_or_else(|| ConfigError::NoBackend {
            chain: chain.to_string(),
        })
}

/// Interpreter program for a runtime identifier: `3.12` -> `python3.12`.
pub fn runtime_program(runtime: &str) -> String {
    if runtime.starts_with(|ch: char| ch.is_ascii_digit()) {
        format!("python{runtime}")
    } else {
        runtime.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EnvKey {
    pub backend: Backend,
    pub runtime: String,
    pub deps_digest: String,
}

impl EnvKey {
    pub fn new(backend: Backend, runtime: &str, dependencies: &[String]) -> Self {
        let mut material = format!("{}\0{}", backend.as_str(), runtime);
        for dep in dependencies {
            material.push('\0');
            material.push_str(dep);
        }
        Self {
            backend,
            runtime: runtime.to_string(),
            deps_digest: sha256_hex(material.as_bytes()),
        }
    }

    fn dir_name(&self) -> String {
        let runtime: String = self
            .runtime
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() || ch == '.' { ch } else { '_' })
            .collect();
        format!("{runtime}-{}", &self.deps_digest[..12])
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub key: EnvKey,
    pub dir: PathBuf,
}

impl Environment {
    pub fn new(root: &Path, key: EnvKey) -> Self {
        let dir = root.join(key.dir_name());
        Self { key, dir }
    }

    pub fn backend(&self) -> Backend {
        self.key.backend
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.dir.join("Scripts")
        } else {
            self.dir.join("bin")
        }
    }

    /// Persistent scratch space that survives until the environment is recreated.
    pub fn tmp_dir(&self) -> PathBuf {
        self.dir.join("tmp")
    }

    fn python(&self) -> PathBuf {
        self.bin_dir().join(if cfg!(windows) { "python.exe" } else { "python" })
    }

    /// Host interpreter that must exist before this environment can be
    /// created. uv fetches interpreters itself; `none` runs whatever is on PATH.
    pub fn required_interpreter(&self) -> Option<String> {
        match self.backend() {
            Backend::Venv => Some(runtime_program(&self.key.runtime)),
            Backend::Uv | Backend::None => None,
        }
    }

    pub fn create_commands(&self) -> Vec<CommandSpec> {
        let dir = self.dir.display().to_string();
        match self.backend() {
            Backend::Venv => vec![CommandSpec::new(runtime_program(&self.key.runtime))
                .args(["-m", "venv", dir.as_str()])],
            Backend::Uv => vec![CommandSpec::new("uv").args([
                "venv",
                "--python",
                self.key.runtime.as_str(),
                dir.as_str(),
            ])],
            Backend::None => Vec::new(),
        }
    }

    /// Command installing `packages`, or `None` when the backend cannot install.
    pub fn install_command(&self, packages: &[String]) -> Option<CommandSpec> {
        let python = self.python().display().to_string();
        match self.backend() {
            Backend::Venv => Some(
                CommandSpec::new(self.python())
                    .args(["-m", "pip", "install"])
                    .args(packages.iter().cloned()),
            ),
            Backend::Uv => Some(
                CommandSpec::new("uv")
                    .args(["pip", "install", "--python", python.as_str()])
                    .args(packages.iter().cloned()),
            ),
            Backend::None => None,
        }
    }

    /// Variables that activate the environment for child processes.
    pub fn activation_env(&self) -> Result<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();
        if self.backend() == Backend::None {
            return Ok(vars);
        }
        let mut paths = vec![self.bin_dir()];
        if let Some(existing) = env::var_os("PATH") {
            paths.extend(env::split_paths(&existing));
        }
        let joined: OsString = env::join_paths(paths).context("join PATH entries")?;
        vars.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        vars.insert(
            "VIRTUAL_ENV".to_string(),
            self.dir.display().to_string(),
        );
        Ok(vars)
    }

    /// Resolve a program name, preferring the environment's own executables.
    pub fn resolve_program(&self, program: &str) -> PathBuf {
        if self.backend() != Backend::None && !program.contains(std::path::MAIN_SEPARATOR) {
            let candidate = self.bin_dir().join(program);
            if candidate.is_file() {
                return candidate;
            }
        }
        which::which(program).unwrap_or_else(|_| PathBuf::from(program))
    }
}

/// Environments provisioned during the current invocation.
#[derive(Debug)]
pub struct EnvironmentPool {
    root: PathBuf,
    reuse_existing: bool,
    ready: BTreeMap<EnvKey, Environment>,
}

impl EnvironmentPool {
    pub fn new(root: PathBuf, reuse_existing: bool) -> Self {
        Self {
            root,
            reuse_existing,
            ready: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, key: &EnvKey) -> Option<&Environment> {
        self.ready.get(key)
    }

    /// Fresh handle for a key that has not been provisioned yet.
    pub fn environment_for(&self, key: EnvKey) -> Environment {
        Environment::new(&self.root, key)
    }

    /// Prepare the directory for provisioning. Returns true when the
    /// backend's create commands still need to run.
    pub fn prepare(&self, environment: &Environment) -> Result<bool> {
        let exists = environment.dir.exists();
        if exists && !self.reuse_existing {
            tracing::debug!(dir = %environment.dir.display(), "removing stale environment");
            fs::remove_dir_all(&environment.dir)
                .with_context(|| format!("remove {}", environment.dir.display()))?;
        }
        let needs_create = !(exists && self.reuse_existing);
        if needs_create && environment.backend() == Backend::None {
            fs::create_dir_all(&environment.dir)
                .with_context(|| format!("create {}", environment.dir.display()))?;
            return Ok(false);
        }
        Ok(needs_create)
    }

    pub fn mark_ready(&mut self, environment: Environment) {
        self.ready.insert(environment.key.clone(), environment);
    }
}
