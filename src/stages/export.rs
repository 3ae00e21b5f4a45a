//! Simulated export to an external endpoint.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`ExportStage`].
pub const STAGE_TYPE: &str = "export";

/// Logs every record against `endpoint` and returns the input unchanged.
pub struct ExportStage {
    name: String,
    endpoint: String,
}

impl ExportStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if `endpoint` is not a string.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self {
            name: name.to_string(),
            endpoint: config.optional_str("endpoint")?.unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl Stage for ExportStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        info!(
            stage = %self.name,
            endpoint = %self.endpoint,
            items = records.len(),
            "Exporting records"
        );
        for record in &records {
            info!(stage = %self.name, record = %record, "Export record");
        }
        Ok(records)
    }
}
