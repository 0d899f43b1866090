//! Parameter axes and their cartesian expansion.
use crate::error::ConfigError;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// One labeled value on an axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue {
    pub label: String,
    /// Raw value; may still contain templates such as `{root}`.
    pub value: String,
    pub vars: BTreeMap<String, String>,
}

impl ParamValue {
    pub fn plain(value: &str) -> Self {
        Self {
            label: value.to_string(),
            value: value.to_string(),
            vars: BTreeMap::new(),
        }
    }
}

/// A named axis of labeled values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

impl ParameterAxis {
    pub fn new(name: &str, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.to_string(),
            values,
        }
    }

    /// Build an axis from the files in `dir` with the given extension.
    ///
    /// Labels are file stems; files whose name starts with `exclude_prefix`
    /// are ignored. A missing directory yields an empty axis rather than an
    /// error so the emptiness is reported when a session bound to it is selected.
    pub fn from_files(
        name: &str,
        dir: &Path,
        extension: &str,
        exclude_prefix: Option<&str>,
    ) -> Result<Self> {
        let mut values = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                if exclude_prefix.is_some_and(|prefix| stem.starts_with(prefix)) {
                    continue;
                }
                values.push(ParamValue::plain(stem));
            }
        }
        values.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(Self::new(name, values))
    }

    /// Labels name executions, so each one may appear only once per axis.
    pub fn check_labels(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for value in &self.values {
            if !seen.insert(value.label.as_str()) {
                return Err(ConfigError::DuplicateAxisLabel {
                    axis: self.name.clone(),
                    label: value.label.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A single point in the product of a definition's axes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Combination {
    /// `(axis name, value)` in binding order.
    pub bindings: Vec<(String, ParamValue)>,
}

impl Combination {
    pub fn get(&self, axis: &str) -> Option<&ParamValue> {
        self.bindings
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value)
    }

    /// Bracketed label suffix, empty for unparametrized sessions.
    pub fn suffix(&self) -> String {
        if self.bindings.is_empty() {
            return String::new();
        }
        let labels: Vec<&str> = self
            .bindings
            .iter()
            .map(|(_, value)| value.label.as_str())
            .collect();
        format!("[{}]", labels.join(","))
    }
}

/// Cartesian product of `axes`, first axis varying slowest.
///
/// Zero axes yield a single empty combination; any empty axis is an error.
pub fn expand(session: &str, axes: &[ParameterAxis]) -> Result<Vec<Combination>, ConfigError> {
    let mut combos = vec![Combination::default()];
    for axis in axes {
        if axis.values.is_empty() {
            return Err(ConfigError::EmptyAxis {
                session: session.to_string(),
                axis: axis.name.clone(),
            });
        }
        let mut next = Vec::with_capacity(combos.len() * axis.values.len());
        for combo in &combos {
            for value in &axis.values {
                let mut bindings = combo.bindings.clone();
                bindings.push((axis.name.clone(), value.clone()));
                next.push(Combination { bindings });
            }
        }
        combos = next;
    }
    Ok(combos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn axis(name: &str, labels: &[&str]) -> ParameterAxis {
        ParameterAxis::new(name, labels.iter().map(|l| ParamValue::plain(l)).collect())
    }

    #[test]
    fn single_axis_yields_one_combination_per_value() {
        let combos = expand("tests", &[axis("installable", &["no-extras", "format"])]).unwrap();
        let suffixes: Vec<String> = combos.iter().map(Combination::suffix).collect();
        assert_eq!(suffixes, vec!["[no-extras]", "[format]"]);
    }

    #[test]
    fn multiple_axes_combine_as_product() {
        let combos = expand(
            "matrix",
            &[axis("a", &["1", "2"]), axis("b", &["x", "y", "z"])],
        )
        .unwrap();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0].suffix(), "[1,x]");
        assert_eq!(combos[5].suffix(), "[2,z]");
        assert_eq!(combos[4].get("b").map(|v| v.label.as_str()), Some("y"));
    }

    #[test]
    fn no_axes_yields_single_unsuffixed_combination() {
        let combos = expand("style", &[]).unwrap();
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].suffix(), "");
    }

    #[test]
    fn empty_axis_is_flagged() {
        let err = expand("bench", &[axis("benchmark", &[])]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAxis { ref axis, .. } if axis == "benchmark"));
    }

    #[test]
    fn repeated_label_is_rejected() {
        let mut repeated = axis("builder", &["html"]);
        repeated.values.push(ParamValue {
            label: "html".to_string(),
            value: "dirhtml".to_string(),
            vars: BTreeMap::new(),
        });
        let err = repeated.check_labels().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateAxisLabel { ref axis, ref label } if axis == "builder" && label == "html"
        ));
        assert!(axis("builder", &["html", "man"]).check_labels().is_ok());
    }

    #[test]
    fn file_axis_uses_sorted_stems_and_skips_excluded() {
        let dir = TempDir::new().expect("tempdir");
        for name in ["subcomponents.py", "_private.py", "issue232.py", "notes.txt"] {
            fs::write(dir.path().join(name), "").expect("write fixture");
        }
        let axis = ParameterAxis::from_files("benchmark", dir.path(), "py", Some("_")).unwrap();
        let labels: Vec<&str> = axis.values.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["issue232", "subcomponents"]);
    }

    #[test]
    fn file_axis_for_missing_directory_is_empty() {
        let dir = TempDir::new().expect("tempdir");
        let axis =
            ParameterAxis::from_files("benchmark", &dir.path().join("missing"), "py", None).unwrap();
        assert!(axis.values.is_empty());
    }
}
