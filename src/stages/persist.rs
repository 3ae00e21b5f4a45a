//! Simulated document-store persistence.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`PersistStage`].
pub const STAGE_TYPE: &str = "persist";

/// Logs each record as it would be inserted and passes the input through.
///
/// Config keys: `uri`, `database`, `collection`, and `pretty` (default
/// true) to log indented documents.
pub struct PersistStage {
    name: String,
    uri: String,
    database: String,
    collection: String,
    pretty: bool,
}

impl PersistStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if a key has the wrong type.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        let stage = Self {
            name: name.to_string(),
            uri: config.optional_str("uri")?.unwrap_or_default().to_string(),
            database: config.optional_str("database")?.unwrap_or_default().to_string(),
            collection: config
                .optional_str("collection")?
                .unwrap_or_default()
                .to_string(),
            pretty: config.optional_bool("pretty")?.unwrap_or(true),
        };
        debug!(
            stage = %stage.name,
            uri = %stage.uri,
            database = %stage.database,
            collection = %stage.collection,
            "Initialized persist stage in simulation mode"
        );
        Ok(stage)
    }

    /// Fully qualified target collection.
    pub fn target(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    fn render(&self, record: &Record) -> Result<String, StageError> {
        let document = if self.pretty {
            serde_json::to_string_pretty(record)?
        } else {
            serde_json::to_string(record)?
        };
        Ok(document)
    }
}

#[async_trait]
impl Stage for PersistStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        if records.is_empty() {
            debug!(stage = %self.name, "No records received, skipping persistence");
            return Ok(records);
        }

        info!(
            stage = %self.name,
            target = %self.target(),
            items = records.len(),
            "Simulating insert"
        );
        for (i, record) in records.iter().enumerate() {
            let document = self.render(record)?;
            info!(stage = %self.name, document = i + 1, "\n{}", document);
        }

        Ok(records)
    }
}
