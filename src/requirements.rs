//! Ordered regeneration of pinned requirements files.
//!
//! Entries are resolved strictly in declaration order because an input may
//! pull in (`-r`/`-c`) the freshly resolved output of an earlier entry. The
//! first failure stops the chain and leaves later outputs untouched.
use crate::error::{ConfigError, SessionError};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// One `(input spec, output lock)` pair, both relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChainEntry {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementsChain {
    entries: Vec<ChainEntry>,
}

impl RequirementsChain {
    pub fn new(entries: Vec<ChainEntry>) -> Result<Self, ConfigError> {
        for (idx, entry) in entries.iter().enumerate() {
            let output = normalize(&entry.output);
            if entries[..idx]
                .iter()
                .any(|earlier| normalize(&earlier.output) == output)
            {
                return Err(ConfigError::DuplicateChainOutput {
                    output: entry.output.clone(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject inputs that reference the output of their own or a later entry.
    pub fn check_order(&self, root: &Path) -> Result<()> {
        let outputs: Vec<PathBuf> = self
            .entries
            .iter()
            .map(|entry| normalize(&entry.output))
            .collect();
        for (idx, entry) in self.entries.iter().enumerate() {
            let path = root.join(&entry.input);
            if !path.is_file() {
                continue;
            }
            let text =
                fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            let base = entry.input.parent().unwrap_or_else(|| Path::new(""));
            for reference in references(&text)? {
                let resolved = normalize(&base.join(&reference));
                if outputs[idx..].contains(&resolved) {
                    return Err(ConfigError::ChainOrder {
                        input: entry.input.clone(),
                        reference: resolved,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Regenerate every output in order with `resolver` (an argv prefix).
    ///
    /// `run` launches one command from the project root. Returns the number
    /// of regenerated entries.
    pub fn regenerate(
        &self,
        resolver: &[String],
        extra_args: &[String],
        run: &mut dyn FnMut(&str, Vec<String>) -> Result<()>,
    ) -> Result<usize> {
        let (program, prefix) = resolver
            .split_first()
            .ok_or_else(|| anyhow!("requirements resolver command is empty"))?;
        for (idx, entry) in self.entries.iter().enumerate() {
            tracing::info!(
                step = idx + 1,
                of = self.entries.len(),
                input = %entry.input.display(),
                output = %entry.output.display(),
                "regenerating requirements"
            );
            let mut args = prefix.to_vec();
            args.extend(extra_args.iter().cloned());
            args.push("--output-file".to_string());
            args.push(entry.output.display().to_string());
            args.push(entry.input.display().to_string());
            if let Err(err) = run(program, args) {
                let skipped = self.entries.len() - idx - 1;
                if skipped > 0 {
                    tracing::warn!(skipped, "requirements chain aborted");
                }
                return Err(SessionError::ChainFailure {
                    input: entry.input.clone(),
                    reason: format!("{err:#}"),
                }
                .into());
            }
        }
        Ok(self.entries.len())
    }
}

fn references(text: &str) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(r"^\s*(?:-r|-c|--requirement|--constraint)(?:\s*=\s*|\s+)?(\S+)")
        .context("compile requirement reference pattern")?;
    Ok(text
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .collect())
}

/// Lexically clean a relative path: drop `.` and fold `..`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(input: &str, output: &str) -> ChainEntry {
        ChainEntry {
            input: PathBuf::from(input),
            output: PathBuf::from(output),
        }
    }

    fn chain() -> RequirementsChain {
        RequirementsChain::new(vec![
            entry("requirements/base.in", "requirements/base.txt"),
            entry("docs/requirements.in", "docs/requirements.txt"),
            entry("requirements/dev.in", "requirements/dev.txt"),
        ])
        .unwrap()
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let err = RequirementsChain::new(vec![
            entry("a.in", "out/a.txt"),
            entry("b.in", "out/./a.txt"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChainOutput { .. }));
    }

    #[test]
    fn regenerates_in_declared_order() {
        let mut lines = Vec::new();
        let count = chain()
            .regenerate(
                &["uv".to_string(), "pip".to_string(), "compile".to_string()],
                &["--upgrade".to_string()],
                &mut |program: &str, args: Vec<String>| -> Result<()> {
                    lines.push(format!("{program} {}", args.join(" ")));
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            lines,
            vec![
                "uv pip compile --upgrade --output-file requirements/base.txt requirements/base.in",
                "uv pip compile --upgrade --output-file docs/requirements.txt docs/requirements.in",
                "uv pip compile --upgrade --output-file requirements/dev.txt requirements/dev.in",
            ]
        );
    }

    #[test]
    fn failure_stops_remaining_entries() {
        let mut attempted = Vec::new();
        let err = chain()
            .regenerate(
                &["pip-compile".to_string()],
                &[],
                &mut |_program: &str, args: Vec<String>| -> Result<()> {
                    let input = args.last().cloned().unwrap_or_default();
                    attempted.push(input.clone());
                    if input == "requirements/base.in" {
                        return Err(anyhow!("resolver exited with 1"));
                    }
                    Ok(())
                },
            )
            .unwrap_err();
        assert_eq!(attempted, vec!["requirements/base.in"]);
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::ChainFailure { .. })
        ));
    }

    #[test]
    fn references_to_earlier_outputs_are_allowed() {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir_all(root.path().join("docs")).unwrap();
        fs::create_dir_all(root.path().join("requirements")).unwrap();
        fs::write(
            root.path().join("docs/requirements.in"),
            "-c ../requirements/base.txt\nsphinx\n",
        )
        .unwrap();
        chain().check_order(root.path()).unwrap();
    }

    #[test]
    fn references_to_later_outputs_are_rejected() {
        let root = TempDir::new().expect("tempdir");
        fs::create_dir_all(root.path().join("requirements")).unwrap();
        fs::write(
            root.path().join("requirements/base.in"),
            "--requirement=dev.txt\n",
        )
        .unwrap();
        let err = chain().check_order(root.path()).unwrap_err();
        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::ChainOrder { reference, .. }) => {
                assert_eq!(reference, &PathBuf::from("requirements/dev.txt"));
            }
            other => panic!("expected chain order error, got {other:?}"),
        }
    }

    #[test]
    fn reference_pattern_handles_spacing_variants() {
        let refs = references("-r base.txt\n  -c=pins.txt\n--constraint x.txt\nrequests\n").unwrap();
        assert_eq!(
            refs,
            vec![
                PathBuf::from("base.txt"),
                PathBuf::from("pins.txt"),
                PathBuf::from("x.txt"),
            ]
        );
    }
}
