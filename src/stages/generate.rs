//! Synthetic record generator.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StageError;
use crate::record::{Record, RecordMap};
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`GenerateStage`].
pub const STAGE_TYPE: &str = "generate";

const DEFAULT_COUNT: u64 = 5;
const DEFAULT_FIELD: &str = "name";
const DEFAULT_PREFIX: &str = "record";

/// Emits `count` records `{"id": i, <field>: "<prefix>-i"}` when it has no
/// input, and passes non-empty input through unchanged.
pub struct GenerateStage {
    name: String,
    count: u64,
    field: String,
    prefix: String,
}

impl GenerateStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if a key has the wrong type.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self {
            name: name.to_string(),
            count: config.optional_u64("count")?.unwrap_or(DEFAULT_COUNT),
            field: config
                .optional_str("field")?
                .unwrap_or(DEFAULT_FIELD)
                .to_string(),
            prefix: config
                .optional_str("prefix")?
                .unwrap_or(DEFAULT_PREFIX)
                .to_string(),
        })
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        if !records.is_empty() {
            return Ok(records);
        }

        debug!(stage = %self.name, count = self.count, "Generating records");
        Ok((0..self.count)
            .map(|i| {
                let mut record = RecordMap::new();
                record.insert("id".to_string(), Value::from(i));
                record.insert(
                    self.field.clone(),
                    Value::String(format!("{}-{}", self.prefix, i)),
                );
                Record::Object(record)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_generates_defaults() {
        let stage = GenerateStage::new("Gen", &StageConfig::new()).unwrap();
        let out = stage
            .process(&CancellationToken::new(), Vec::new())
            .await
            .unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!(out[0], json!({"id": 0, "name": "record-0"}));
        assert_eq!(out[4], json!({"id": 4, "name": "record-4"}));
    }

    #[tokio::test]
    async fn test_custom_config_and_passthrough() {
        let config = StageConfig::new()
            .with("count", 2)
            .with("field", "Name")
            .with("prefix", "user");
        let stage = GenerateStage::new("Gen", &config).unwrap();

        let out = stage
            .process(&CancellationToken::new(), Vec::new())
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"id": 0, "Name": "user-0"}),
                json!({"id": 1, "Name": "user-1"})
            ]
        );

        let passthrough = stage
            .process(&CancellationToken::new(), vec![json!("keep")])
            .await
            .unwrap();
        assert_eq!(passthrough, vec![json!("keep")]);
    }
}
