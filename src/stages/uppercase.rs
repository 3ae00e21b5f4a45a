//! In-place uppercase transform of one string field.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`UppercaseStage`].
pub const STAGE_TYPE: &str = "uppercase";

/// Uppercases the string value of `uppercaseField` in every map record.
///
/// Non-map records are dropped. Maps without the field, or where it is not
/// a string, pass through unchanged.
pub struct UppercaseStage {
    name: String,
    field: String,
}

impl UppercaseStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::MissingConfig` if `uppercaseField` is absent.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self {
            name: name.to_string(),
            field: config.required_str("uppercaseField")?.to_string(),
        })
    }
}

#[async_trait]
impl Stage for UppercaseStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        debug!(stage = %self.name, field = %self.field, items = records.len(), "Transforming records");

        let input = records.len();
        let output: Vec<Record> = records
            .into_iter()
            .filter_map(|mut record| {
                let map = record.as_object_mut()?;
                if let Some(Value::String(value)) = map.get_mut(&self.field) {
                    *value = value.to_uppercase();
                }
                Some(record)
            })
            .collect();

        if output.len() < input {
            warn!(
                stage = %self.name,
                dropped = input - output.len(),
                "Dropped non-map records"
            );
        }
        Ok(output)
    }
}
