//! Resolve an invocation's selectors into an ordered list of executions.
use crate::error::ConfigError;
use crate::registry::SessionRegistry;
use crate::session::{expand, ConcreteSession};
use std::collections::BTreeSet;

/// What the user asked to run. Empty names and tags mean the default set.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
    pub names: Vec<String>,
    pub tags: Vec<String>,
    pub runtime: Option<String>,
}

impl SelectionRequest {
    fn is_default(&self) -> bool {
        self.names.is_empty() && self.tags.is_empty()
    }
}

/// Resolve `request` against `registry`.
///
/// Name matches come first in request order, then tag matches in declaration
/// order. Every selector must match something, and so must the request as a
/// whole after the runtime filter; duplicates keep their first position.
pub fn select(
    registry: &SessionRegistry,
    request: &SelectionRequest,
) -> Result<Vec<ConcreteSession>, ConfigError> {
    let mut picked = Vec::new();

    if request.is_default() {
        for definition in registry.defaults() {
            picked.extend(expand(definition)?);
        }
    } else {
        for name in &request.names {
            let matched = match_name(registry, name)?;
            if matched.is_empty() {
                return Err(ConfigError::UnknownSession { name: name.clone() });
            }
            picked.extend(matched);
        }
        if !request.tags.is_empty() {
            for definition in registry.sessions() {
                if definition.has_any_tag(&request.tags) {
                    picked.extend(expand(definition)?);
                }
            }
        }
    }

    let mut seen = BTreeSet::new();
    picked.retain(|session| seen.insert(session.name.clone()));
    if let Some(runtime) = request.runtime.as_deref() {
        picked.retain(|session| session.runtime == runtime);
    }
    if picked.is_empty() {
        return Err(ConfigError::NothingSelected);
    }
    tracing::debug!(count = picked.len(), "selection resolved");
    Ok(picked)
}

fn match_name(registry: &SessionRegistry, name: &str) -> Result<Vec<ConcreteSession>, ConfigError> {
    if let Some(definition) = registry.get(name) {
        return expand(definition);
    }
    // Qualified selectors (`tests-3.12`, `tests[format]`) only need the
    // definitions whose name prefixes them.
    let mut matched = Vec::new();
    for definition in registry.sessions() {
        let Some(rest) = name.strip_prefix(definition.name.as_str()) else {
            continue;
        };
        if let Some(axis) = definition.empty_axis() {
            // Only a qualifier on this very definition can name it.
            if rest.starts_with('-') || rest.starts_with('[') {
                return Err(ConfigError::EmptyAxis {
                    session: definition.name.clone(),
                    axis: axis.to_string(),
                });
            }
            continue;
        }
        matched.extend(
            expand(definition)?
                .into_iter()
                .filter(|session| session.matches(name)),
        );
    }
    Ok(matched)
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
