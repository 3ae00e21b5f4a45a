//! JSON-lines event import.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`ImportEventsStage`].
pub const STAGE_TYPE: &str = "import_events";

/// Default event file.
pub const DEFAULT_SOURCE_FILE: &str = "./data/events.log";

/// Reads one JSON object per line from `sourceFile`.
///
/// Blank lines are ignored. Lines that are not JSON objects are skipped with
/// a warning. Upstream input is ignored.
pub struct ImportEventsStage {
    name: String,
    source_file: PathBuf,
}

impl ImportEventsStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if `sourceFile` is not a string.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        let source_file = config
            .optional_str("sourceFile")?
            .unwrap_or(DEFAULT_SOURCE_FILE);
        Ok(Self {
            name: name.to_string(),
            source_file: PathBuf::from(source_file),
        })
    }

    fn read_error(&self, source: std::io::Error) -> StageError {
        StageError::Read {
            path: self.source_file.clone(),
            source,
        }
    }
}

#[async_trait]
impl Stage for ImportEventsStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        _records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        info!(stage = %self.name, source = %self.source_file.display(), "Reading events");

        let file = File::open(&self.source_file)
            .await
            .map_err(|e| self.read_error(e))?;
        let mut lines = BufReader::new(file).lines();

        let mut events = Vec::new();
        let mut skipped = 0usize;
        let mut line_number = 0usize;

        while let Some(line) = lines.next_line().await.map_err(|e| self.read_error(e))? {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }
            line_number += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Record>(line) {
                Ok(event @ Record::Object(_)) => events.push(event),
                Ok(_) => {
                    warn!(stage = %self.name, line = line_number, "Skipping line that is not a JSON object");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(stage = %self.name, line = line_number, error = %e, "Skipping malformed line");
                    skipped += 1;
                }
            }
        }

        debug!(stage = %self.name, lines = line_number, "Finished reading event file");
        info!(
            stage = %self.name,
            events = events.len(),
            skipped = skipped,
            "Imported events"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn stage_for(path: &std::path::Path) -> ImportEventsStage {
        let config = StageConfig::new().with("sourceFile", path.to_string_lossy().to_string());
        ImportEventsStage::new("ImportEvents", &config).unwrap()
    }

    #[tokio::test]
    async fn test_reads_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        fs::write(
            &path,
            "{\"event\":\"e1\"}\n\n{\"event\":\"e2\"}\ninvalidjson\n42\n{\"event\":\"e3\"}\n",
        )
        .unwrap();

        let out = stage_for(&path)
            .process(&CancellationToken::new(), Vec::new())
            .await
            .unwrap();

        let events: Vec<&str> = out.iter().map(|r| r["event"].as_str().unwrap()).collect();
        assert_eq!(events, vec!["e1", "e2", "e3"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let err = stage_for(&dir.path().join("missing.log"))
            .process(&CancellationToken::new(), Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Read { .. }));
    }

    #[test]
    fn test_default_source_file() {
        let stage = ImportEventsStage::new("ImportEvents", &StageConfig::new()).unwrap();
        assert_eq!(stage.source_file, PathBuf::from(DEFAULT_SOURCE_FILE));
    }

    #[tokio::test]
    async fn test_cancelled_between_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        fs::write(&path, "{\"event\":\"e1\"}\n").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            stage_for(&path).process(&cancel, Vec::new()).await,
            Err(StageError::Cancelled)
        ));
    }
}
