//! Pipeline definitions loaded from a YAML document.
//!
//! The document maps pipeline names to ordered stage lists:
//!
//! ```yaml
//! pipelines:
//!   contacts:
//!     - name: ImportContacts
//!       type: import_contacts
//!     - name: Upper
//!       type: uppercase
//!       concurrency: 2
//!       batchSize: 10
//!       config:
//!         uppercaseField: Name
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::stage::StageSpec;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML or does not match the expected shape.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document defines no pipelines.
    #[error("No pipelines defined")]
    NoPipelines,

    /// Configuration validation failed.
    #[error("Invalid pipeline '{pipeline}': {message}")]
    Validation { pipeline: String, message: String },

    /// None of the requested pipelines exist.
    #[error("None of the requested pipelines are defined: {}", .requested.join(", "))]
    NoneSelected { requested: Vec<String> },
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline name to ordered stage list.
    #[serde(default)]
    pub pipelines: BTreeMap<String, Vec<StageSpec>>,
}

impl AppConfig {
    /// Reads, parses and validates the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is unreadable, malformed, defines no
    /// pipelines, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is malformed, defines no
    /// pipelines, or fails validation.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(contents)?;
        if config.pipelines.is_empty() {
            return Err(ConfigError::NoPipelines);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Every stage needs a non-empty name and type, and stage names must be
    /// unique within their pipeline. A pipeline with no stages is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (pipeline, stages) in &self.pipelines {
            let mut seen = HashSet::new();
            for (index, stage) in stages.iter().enumerate() {
                if stage.name.trim().is_empty() {
                    return Err(ConfigError::Validation {
                        pipeline: pipeline.clone(),
                        message: format!("stage {} has an empty name", index),
                    });
                }
                if stage.stage_type.trim().is_empty() {
                    return Err(ConfigError::Validation {
                        pipeline: pipeline.clone(),
                        message: format!("stage '{}' has an empty type", stage.name),
                    });
                }
                if !seen.insert(stage.name.as_str()) {
                    return Err(ConfigError::Validation {
                        pipeline: pipeline.clone(),
                        message: format!("duplicate stage name '{}'", stage.name),
                    });
                }
            }
        }
        Ok(())
    }

    /// Returns the stages of one pipeline.
    pub fn pipeline(&self, name: &str) -> Option<&[StageSpec]> {
        self.pipelines.get(name).map(Vec::as_slice)
    }

    /// Pipeline names in sorted order.
    pub fn pipeline_names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// Selects pipelines by name, in request order.
    ///
    /// An empty selection returns every pipeline. Unknown names are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoneSelected` if names were requested and none
    /// of them are defined.
    pub fn select<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<(&str, &[StageSpec])>, ConfigError> {
        if names.is_empty() {
            return Ok(self
                .pipelines
                .iter()
                .map(|(name, stages)| (name.as_str(), stages.as_slice()))
                .collect());
        }

        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            match self.pipelines.get_key_value(name) {
                Some((key, stages)) => selected.push((key.as_str(), stages.as_slice())),
                None => warn!(pipeline = %name, "Pipeline not found in configuration, skipping"),
            }
        }

        if selected.is_empty() {
            return Err(ConfigError::NoneSelected {
                requested: names.iter().map(|n| n.as_ref().to_string()).collect(),
            });
        }
        Ok(selected)
    }
}
