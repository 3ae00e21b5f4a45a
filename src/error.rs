//! Error types shared across flowforge subsystems.
//!
//! Defines the errors raised by:
//! - Stage implementations and their constructors
//! - The stage registry
//! - The durable stage cache
//!
//! Runner, orchestrator and configuration errors live next to their
//! modules in [`crate::pipeline`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by a stage's constructor or its `process` call.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Missing required config key '{key}'")]
    MissingConfig { key: String },

    #[error("Invalid value for config key '{key}': expected {expected}")]
    InvalidConfig { key: String, expected: &'static str },

    #[error("Unsupported aggregation type '{0}'")]
    UnsupportedAggregation(String),

    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status code {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl StageError {
    /// Shorthand for a free-form processing failure.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }
}

/// Errors that can occur while resolving a stage from the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown stage type '{stage_type}'")]
    UnknownStageType { stage_type: String },

    #[error("Failed to construct stage '{name}' of type '{stage_type}': {source}")]
    Construction {
        stage_type: String,
        name: String,
        #[source]
        source: StageError,
    },
}

/// Errors raised by the file-backed stage cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read cache file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse cache file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize cache for '{}': {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write cache file '{}': {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
