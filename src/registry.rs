//! Session registration.
//!
//! Declaration happens against a `RegistryBuilder`; freezing it yields the
//! read-only `SessionRegistry` that selection works from. Nothing here is
//! process-global, so every caller (and every test) owns its own registry.
use crate::error::ConfigError;
use crate::session::{self, SessionDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    sessions: Vec<Arc<SessionDefinition>>,
    index: BTreeMap<String, usize>,
    defaults: Vec<usize>,
    /// Concrete execution names produced so far.
    executions: BTreeSet<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its resolved name and return the shared
    /// handle to it.
    ///
    /// Default-membership definitions are appended to the default set in
    /// registration order. Both the definition name and every concrete
    /// execution name it expands to must be new.
    pub fn register(
        &mut self,
        definition: SessionDefinition,
    ) -> Result<Arc<SessionDefinition>, ConfigError> {
        if self.index.contains_key(&definition.name)
            || self.executions.contains(&definition.name)
        {
            return Err(ConfigError::DuplicateSession {
                name: definition.name,
            });
        }
        let handle = Arc::new(definition);
        // A definition over an empty axis has no executions yet; selecting it
        // reports the empty axis.
        let concrete = match session::expand(&handle) {
            Ok(sessions) => sessions,
            Err(ConfigError::EmptyAxis { .. }) => Vec::new(),
            Err(err) => return Err(err),
        };
        let mut fresh = BTreeSet::new();
        for execution in concrete {
            if self.executions.contains(&execution.name)
                || self.index.contains_key(&execution.name)
                || !fresh.insert(execution.name.clone())
            {
                return Err(ConfigError::DuplicateSession {
                    name: execution.name,
                });
            }
        }
        let definition = handle.as_ref();
        let slot = self.sessions.len();
        tracing::debug!(
            session = %definition.name,
            default = definition.default,
            axes = definition.axes.len(),
            "register session"
        );
        self.index.insert(definition.name.clone(), slot);
        if definition.default {
            self.defaults.push(slot);
        }
        self.executions.extend(fresh);
        self.sessions.push(Arc::clone(&handle));
        Ok(handle)
    }

    pub fn freeze(self) -> SessionRegistry {
        SessionRegistry {
            sessions: self.sessions,
            index: self.index,
            defaults: self.defaults,
        }
    }
}

/// Frozen table of declared sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Vec<Arc<SessionDefinition>>,
    index: BTreeMap<String, usize>,
    defaults: Vec<usize>,
}

impl SessionRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<SessionDefinition>> {
        self.index.get(name).map(|slot| &self.sessions[*slot])
    }

    /// All definitions in declaration order.
    pub fn sessions(&self) -> &[Arc<SessionDefinition>] {
        &self.sessions
    }

    /// Default-set definitions in declaration order.
    pub fn defaults(&self) -> impl Iterator<Item = &Arc<SessionDefinition>> + '_ {
        self.defaults.iter().map(|slot| &self.sessions[*slot])
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
