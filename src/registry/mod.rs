//! Stage registry mapping type tags to stage constructors.
//!
//! This module provides functionality for:
//! - Registering stage constructors under a type tag
//! - Resolving a [`StageSpec`] into a fresh stage instance
//! - Listing the registered stage types
//!
//! The registry is an explicit object: it is built once at process start,
//! populated with [`StageRegistry::with_builtin_stages`] or manual
//! registrations, and handed to the pipeline orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{RegistryError, StageError};
use crate::stage::{Stage, StageConfig, StageSpec};

/// Constructor building a stage instance from its name and configuration.
pub type StageConstructor =
    Arc<dyn Fn(&str, &StageConfig) -> Result<Arc<dyn Stage>, StageError> + Send + Sync>;

/// Thread-safe lookup table from stage type tag to constructor.
///
/// Lookups take a shared read lock; registrations take the write lock.
/// Registering a tag twice replaces the earlier constructor.
#[derive(Default)]
pub struct StageRegistry {
    constructors: RwLock<HashMap<String, StageConstructor>>,
}

impl StageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the built-in stage types.
    pub fn with_builtin_stages() -> Self {
        let registry = Self::new();
        crate::stages::register_builtin_stages(&registry);
        registry
    }

    /// Register a typed constructor under `stage_type`.
    ///
    /// # Arguments
    /// * `stage_type` - Tag used by [`StageSpec::stage_type`] to select the stage
    /// * `constructor` - Builds the stage from its name and configuration
    pub fn register<F, S>(&self, stage_type: impl Into<String>, constructor: F)
    where
        F: Fn(&str, &StageConfig) -> Result<S, StageError> + Send + Sync + 'static,
        S: Stage + 'static,
    {
        self.register_constructor(
            stage_type,
            Arc::new(move |name: &str, config: &StageConfig| {
                constructor(name, config).map(|stage| Arc::new(stage) as Arc<dyn Stage>)
            }),
        );
    }

    /// Register an already type-erased constructor under `stage_type`.
    pub fn register_constructor(
        &self,
        stage_type: impl Into<String>,
        constructor: StageConstructor,
    ) {
        let stage_type = stage_type.into();
        let mut constructors = self
            .constructors
            .write()
            .expect("registry write lock poisoned");
        if constructors.insert(stage_type.clone(), constructor).is_some() {
            debug!(stage_type = %stage_type, "Replaced existing stage constructor");
        } else {
            debug!(stage_type = %stage_type, "Registered stage constructor");
        }
    }

    /// Construct a fresh stage instance for `spec`.
    ///
    /// Instances are never cached, so per-run state held by a stage is
    /// always new.
    ///
    /// # Errors
    /// Returns `UnknownStageType` if no constructor is registered for the
    /// spec's type, or `Construction` if the constructor rejects the config.
    pub fn resolve(&self, spec: &StageSpec) -> Result<Arc<dyn Stage>, RegistryError> {
        let constructor = {
            let constructors = self
                .constructors
                .read()
                .expect("registry read lock poisoned");
            constructors.get(&spec.stage_type).cloned()
        };

        let constructor = constructor.ok_or_else(|| RegistryError::UnknownStageType {
            stage_type: spec.stage_type.clone(),
        })?;

        constructor(&spec.name, &spec.config).map_err(|source| RegistryError::Construction {
            stage_type: spec.stage_type.clone(),
            name: spec.name.clone(),
            source,
        })
    }

    /// Check whether a type tag is registered.
    pub fn contains(&self, stage_type: &str) -> bool {
        self.constructors
            .read()
            .expect("registry read lock poisoned")
            .contains_key(stage_type)
    }

    /// Registered type tags, sorted.
    pub fn stage_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .constructors
            .read()
            .expect("registry read lock poisoned")
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Number of registered stage types.
    pub fn len(&self) -> usize {
        self.constructors
            .read()
            .expect("registry read lock poisoned")
            .len()
    }

    /// Returns true if no stage types are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stage_types", &self.stage_types())
            .finish()
    }
}
