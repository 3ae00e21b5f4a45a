//! The stage capability contract and stage specifications.
//!
//! Every pluggable stage implements [`Stage`]: a name and a batch transform.
//! A [`StageSpec`] is the declarative description of one stage in a pipeline,
//! as loaded from the pipeline document; the registry turns it into a running
//! [`Stage`] instance.

pub mod config;

pub use config::StageConfig;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::StageError;
use crate::record::Record;

/// A pluggable unit of work in a pipeline.
///
/// `process` may be called concurrently from several workers with different
/// batches when the stage runs with `concurrency > 1`; the engine does not
/// serialize calls to the same instance.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name of the stage instance, as declared in its spec.
    fn name(&self) -> &str;

    /// Transform one batch of records into zero or more output records.
    ///
    /// Generator stages are invoked once with an empty batch when they have
    /// no upstream input.
    async fn process(
        &self,
        cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError>;
}

/// Declarative description of one stage in a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Name, unique within its pipeline.
    pub name: String,
    /// Registry lookup key.
    #[serde(rename = "type")]
    pub stage_type: String,
    /// Number of concurrent workers; 0 means 1.
    #[serde(default)]
    pub concurrency: usize,
    /// Records per batch; 0 means the whole input as one batch.
    #[serde(default)]
    pub batch_size: usize,
    /// Re-sort concurrent output into input batch order.
    #[serde(default)]
    pub ordered: bool,
    /// Stage-specific configuration, consumed by the constructor.
    #[serde(default)]
    pub config: StageConfig,
}

impl StageSpec {
    /// Creates a spec with default concurrency, batching and empty config.
    pub fn new(name: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage_type: stage_type.into(),
            ..Default::default()
        }
    }

    /// Sets the number of concurrent workers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Requests batch-ordered output on the concurrent path.
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Replaces the stage configuration.
    pub fn with_config(mut self, config: StageConfig) -> Self {
        self.config = config;
        self
    }
}
