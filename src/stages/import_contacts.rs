//! Static contact import that remembers when it last ran.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::FileCache;
use crate::error::StageError;
use crate::record::{record_from_pairs, Record};
use crate::stage::{Stage, StageConfig};

use super::open_stage_cache;

/// Registry tag for [`ImportContactsStage`].
pub const STAGE_TYPE: &str = "import_contacts";

/// Cache key holding the RFC 3339 time of the last import.
pub const LAST_IMPORT_KEY: &str = "last_import_date";

const CONTACTS: [(&str, &str); 3] = [
    ("Alice", "alice@example.com"),
    ("Bob", "bob@example.com"),
    ("Charlie", "charlie@example.com"),
];

/// Emits a fixed set of contacts and records the import time in its cache.
///
/// Config keys: `endpoint`, `apiKey` (logged only), `cacheFilePath`.
pub struct ImportContactsStage {
    name: String,
    endpoint: Option<String>,
    has_api_key: bool,
    cache: Option<FileCache>,
}

impl ImportContactsStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if a key has the wrong type.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        Ok(Self {
            name: name.to_string(),
            endpoint: config.optional_str("endpoint")?.map(str::to_string),
            has_api_key: config.optional_str("apiKey")?.is_some(),
            cache: open_stage_cache(name, config)?,
        })
    }
}

#[async_trait]
impl Stage for ImportContactsStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        _records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let last_import = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(LAST_IMPORT_KEY))
            .unwrap_or_else(|| "N/A".to_string());
        info!(
            stage = %self.name,
            endpoint = self.endpoint.as_deref().unwrap_or(""),
            api_key_set = self.has_api_key,
            last_import = %last_import,
            "Importing contacts"
        );

        let imported: Vec<Record> = CONTACTS
            .iter()
            .map(|(name, email)| record_from_pairs([("Name", *name), ("Email", *email)]))
            .collect();

        if let Some(cache) = &self.cache {
            let now = chrono::Utc::now().to_rfc3339();
            match cache.set(LAST_IMPORT_KEY, now.as_str()) {
                Ok(()) => info!(
                    stage = %self.name,
                    last_import = %now,
                    cache = %cache.path().display(),
                    "Updated import date in cache"
                ),
                Err(e) => warn!(
                    stage = %self.name,
                    cache = %cache.path().display(),
                    error = %e,
                    "Failed to update import date in cache"
                ),
            }
        }

        Ok(imported)
    }
}
