//! Explicit registry of stage implementations.
//!
//! The registry is built once at startup and shared by reference with the
//! graph loader and the coordinator. Definitions bind stages to entries by
//! name; an unknown binding is a load-time validation error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::stage::Stage;

/// Registry of stage implementations keyed by binding name.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation under `binding`, replacing any previous entry.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let registry = StageRegistry::new()
    ///     .register("ingest", Arc::new(Ingest))
    ///     .register("analyze", Arc::new(Analyze));
    /// ```
    pub fn register(mut self, binding: impl Into<String>, stage: Arc<dyn Stage>) -> Self {
        self.insert(binding, stage);
        self
    }

    /// In-place variant of [`register`](Self::register).
    pub fn insert(&mut self, binding: impl Into<String>, stage: Arc<dyn Stage>) {
        let binding = binding.into();
        if self.stages.contains_key(&binding) {
            warn!(binding = %binding, "Stage binding registered twice, replacing implementation");
        }
        self.stages.insert(binding, stage);
    }

    /// Looks up an implementation.
    pub fn resolve(&self, binding: &str) -> Option<Arc<dyn Stage>> {
        self.stages.get(binding).cloned()
    }

    /// Returns true if `binding` is registered.
    pub fn contains(&self, binding: &str) -> bool {
        self.stages.contains_key(binding)
    }

    /// Number of registered implementations.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.stages.keys().collect();
        names.sort();
        f.debug_struct("StageRegistry").field("stages", &names).finish()
    }
}
