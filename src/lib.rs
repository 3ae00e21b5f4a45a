//! flowforge: linear multi-stage data pipelines.
//!
//! This library provides a registry of pluggable stages, a batched and
//! optionally concurrent stage runner, a pipeline orchestrator that threads
//! records from stage to stage, and a durable file cache that stages use to
//! carry state between runs.

// Core modules
pub mod cache;
pub mod cli;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod stage;
pub mod stages;

pub use cache::FileCache;
pub use error::{CacheError, RegistryError, StageError};
pub use pipeline::{
    AppConfig, BatchPlan, PipelineError, PipelineOrchestrator, PipelineRun, RunnerError,
    StageRunner,
};
pub use record::Record;
pub use registry::StageRegistry;
pub use stage::{Stage, StageConfig, StageSpec};
