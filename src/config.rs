//! Project file loading.
//!
//! Reading `smx.toml` is the declaration phase: every `[[session]]` table is
//! registered in file order, then the registry is frozen for selection.
use crate::environment::Backend;
use crate::error::ConfigError;
use crate::matrix::{ParamValue, ParameterAxis};
use crate::registry::{RegistryBuilder, SessionRegistry};
use crate::requirements::{ChainEntry, RequirementsChain};
use crate::session::{SessionDefinition, Step};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_PROJECT_FILE: &str = "smx.toml";
const DEFAULT_BACKEND: &str = "uv|venv";
const DEFAULT_ENVDIR: &str = ".smx";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectFile {
    #[serde(default = "default_backend")]
    backend: String,
    #[serde(default = "default_envdir")]
    envdir: PathBuf,
    #[serde(default)]
    default_runtime: Option<String>,
    #[serde(default)]
    axes: BTreeMap<String, AxisDecl>,
    #[serde(default)]
    requirements: Vec<ChainEntry>,
    #[serde(default, rename = "session")]
    sessions: Vec<SessionDecl>,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

fn default_envdir() -> PathBuf {
    PathBuf::from(DEFAULT_ENVDIR)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AxisDecl {
    Values { values: Vec<ValueDecl> },
    Files { files: FilesDecl },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ValueDecl {
    Plain(String),
    Labeled {
        #[serde(default)]
        label: Option<String>,
        value: String,
        #[serde(default)]
        vars: BTreeMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilesDecl {
    dir: PathBuf,
    extension: String,
    #[serde(default)]
    exclude_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuntimeDecl {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionDecl {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    runtime: Option<RuntimeDecl>,
    #[serde(default = "default_true")]
    default: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    parametrize: Vec<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

/// A loaded project: frozen registry plus project-wide settings.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub env_root: PathBuf,
    /// Backend chain used by sessions without their own override.
    pub backend: String,
    pub registry: SessionRegistry,
    pub chain: RequirementsChain,
}

/// Load and declare every session from the project file at `path`.
pub fn load_project(path: &Path) -> Result<Project> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read project file {}", path.display()))?;
    let root = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve project root {}", root.display()))?;
    parse_project(&text, &root).with_context(|| format!("load {}", path.display()))
}

/// Parse project file text with `root` as the project root.
pub fn parse_project(text: &str, root: &Path) -> Result<Project> {
    let file: ProjectFile = toml::from_str(text).context("parse project TOML")?;
    validate_backend_chain(&file.backend)?;

    let mut axes = BTreeMap::new();
    for (name, decl) in &file.axes {
        let axis = resolve_axis(name, decl, root)?;
        axis.check_labels()?;
        axes.insert(name.clone(), axis);
    }

    let mut builder = RegistryBuilder::new();
    for decl in file.sessions {
        let definition = declare(decl, &axes, file.default_runtime.as_deref())?;
        builder.register(definition)?;
    }
    let registry = builder.freeze();
    if registry.is_empty() {
        return Err(anyhow!("no sessions declared"));
    }

    Ok(Project {
        root: root.to_path_buf(),
        env_root: root.join(&file.envdir),
        backend: file.backend,
        registry,
        chain: RequirementsChain::new(file.requirements)?,
    })
}

fn declare(
    decl: SessionDecl,
    axes: &BTreeMap<String, ParameterAxis>,
    default_runtime: Option<&str>,
) -> Result<SessionDefinition, ConfigError> {
    let name = decl.display_name.unwrap_or(decl.name);
    let runtimes = match decl.runtime {
        Some(RuntimeDecl::One(runtime)) => vec![runtime],
        Some(RuntimeDecl::Many(runtimes)) => runtimes,
        None => default_runtime.map(str::to_string).into_iter().collect(),
    };
    if runtimes.is_empty() {
        return Err(ConfigError::MissingRuntime { session: name });
    }
    if let Some(chain) = decl.backend.as_deref() {
        validate_backend_chain(chain)?;
    }
    let mut bound = Vec::with_capacity(decl.parametrize.len());
    for axis in &decl.parametrize {
        let resolved = axes.get(axis).ok_or_else(|| ConfigError::UnknownAxis {
            session: name.clone(),
            axis: axis.clone(),
        })?;
        bound.push(resolved.clone());
    }
    Ok(SessionDefinition {
        name,
        description: decl.description,
        runtimes,
        default: decl.default,
        tags: decl.tags.into_iter().collect(),
        axes: bound,
        backend: decl.backend,
        steps: decl.steps,
    })
}

fn resolve_axis(name: &str, decl: &AxisDecl, root: &Path) -> Result<ParameterAxis> {
    match decl {
        AxisDecl::Values { values } => Ok(ParameterAxis::new(
            name,
            values
                .iter()
                .map(|value| match value {
                    ValueDecl::Plain(value) => ParamValue::plain(value),
                    ValueDecl::Labeled { label, value, vars } => ParamValue {
                        label: label.clone().unwrap_or_else(|| value.clone()),
                        value: value.clone(),
                        vars: vars.clone(),
                    },
                })
                .collect(),
        )),
        AxisDecl::Files { files } => ParameterAxis::from_files(
            name,
            &root.join(&files.dir),
            &files.extension,
            files.exclude_prefix.as_deref(),
        ),
    }
}

fn validate_backend_chain(chain: &str) -> Result<(), ConfigError> {
    for part in chain.split('|') {
        Backend::from_str(part)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
