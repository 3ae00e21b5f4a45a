//! Pipeline execution engine.
//!
//! This module provides the infrastructure for running linear pipelines of
//! pluggable stages over a stream of records.
//!
//! # Architecture
//!
//! The pipeline consists of several components:
//!
//! - **Orchestrator**: Resolves each stage and threads records from stage to stage
//! - **Runner**: Executes one stage over its input in batches, sequentially or
//!   on a bounded worker pool
//! - **Config**: YAML pipeline definitions
//!
//! # Pipeline Flow
//!
//! 1. **Resolution**: Each `StageSpec` is resolved to a fresh stage via the registry
//! 2. **Partitioning**: The current record set is split into contiguous batches
//! 3. **Dispatch**: Batches are processed in order, or pulled by concurrent workers
//! 4. **Merge**: Batch outputs are merged into the next record set, or the first
//!    error aborts the pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flowforge::pipeline::{AppConfig, PipelineOrchestrator};
//! use flowforge::registry::StageRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = AppConfig::load("pipelines.yaml")?;
//! let registry = Arc::new(StageRegistry::with_builtin_stages());
//! let orchestrator = PipelineOrchestrator::new(registry);
//!
//! let stages = config.pipeline("contacts").unwrap_or_default();
//! let run = orchestrator
//!     .run_pipeline(&CancellationToken::new(), "contacts", stages)
//!     .await?;
//!
//! println!("{} produced {} records", run.pipeline, run.records.len());
//! ```

pub mod config;
pub mod orchestrator;
pub mod runner;

pub use config::{AppConfig, ConfigError};
pub use orchestrator::{PipelineError, PipelineOrchestrator, PipelineRun, StageReport};
pub use runner::{partition, BatchPlan, RunnerError, StageOutput, StageRunner};
