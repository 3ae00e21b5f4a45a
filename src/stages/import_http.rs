//! Incremental contact import from a CRM-style HTTP API.
//!
//! Each run requests contacts updated after the previous successful run.
//! The previous run time is kept in the stage cache under `time_offset` as
//! Unix milliseconds.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::FileCache;
use crate::error::StageError;
use crate::record::Record;
use crate::stage::{Stage, StageConfig};

use super::open_stage_cache;

/// Registry tag for [`ImportHttpContactsStage`].
pub const STAGE_TYPE: &str = "import_http_contacts";

/// Default contacts endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.hubapi.com/crm/v3/objects/contacts";

/// Cache key holding the last run time in Unix milliseconds.
pub const TIME_OFFSET_KEY: &str = "time_offset";

const DEFAULT_LIMIT: u64 = 100;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// One page of the contacts listing.
#[derive(Debug, Deserialize)]
struct ContactsPage {
    #[serde(default)]
    results: Vec<Record>,
}

/// Fetches contacts updated since the last run.
///
/// Config keys: `apiKey` (required when processing), `endpoint`, `limit`,
/// `timeoutSecs`, `cacheFilePath`.
pub struct ImportHttpContactsStage {
    name: String,
    api_key: Option<String>,
    endpoint: String,
    limit: u64,
    cache: Option<FileCache>,
    client: Client,
}

impl ImportHttpContactsStage {
    /// Builds the stage from its config.
    ///
    /// A missing `apiKey` is only reported when the stage runs.
    ///
    /// # Errors
    /// Returns `StageError::InvalidConfig` if a key has the wrong type, or
    /// `StageError::Http` if the HTTP client cannot be built.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        let timeout = config
            .optional_u64("timeoutSecs")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            name: name.to_string(),
            api_key: config.optional_str("apiKey")?.map(str::to_string),
            endpoint: config
                .optional_str("endpoint")?
                .unwrap_or(DEFAULT_ENDPOINT)
                .to_string(),
            limit: config.optional_u64("limit")?.unwrap_or(DEFAULT_LIMIT),
            cache: open_stage_cache(name, config)?,
            client,
        })
    }

    fn updated_after(&self) -> Option<i64> {
        let raw = self.cache.as_ref()?.get(TIME_OFFSET_KEY)?;
        match raw.parse::<i64>() {
            Ok(offset) if offset > 0 => Some(offset),
            Ok(_) => None,
            Err(e) => {
                warn!(stage = %self.name, value = %raw, error = %e, "Ignoring invalid cached time offset");
                None
            }
        }
    }

    fn request_url(&self, updated_after: Option<i64>) -> Result<Url, StageError> {
        let mut params = vec![("limit", self.limit.to_string())];
        if let Some(offset) = updated_after {
            params.push(("updatedAfter", offset.to_string()));
        }
        params.push(("archived", "false".to_string()));

        Url::parse_with_params(&self.endpoint, &params)
            .map_err(|e| StageError::processing(format!("invalid endpoint '{}': {}", self.endpoint, e)))
    }
}

#[async_trait]
impl Stage for ImportHttpContactsStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        cancel: &CancellationToken,
        _records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| StageError::MissingConfig {
                key: "apiKey".to_string(),
            })?;

        let run_time = chrono::Utc::now().timestamp_millis();
        let url = self.request_url(self.updated_after())?;
        info!(stage = %self.name, url = %url, "Fetching contacts");

        let request = self.client.get(url).bearer_auth(api_key).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(StageError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(StageError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let page: ContactsPage = serde_json::from_str(&body)?;

        if let Some(cache) = &self.cache {
            match cache.set(TIME_OFFSET_KEY, run_time.to_string()) {
                Ok(()) => info!(
                    stage = %self.name,
                    time_offset = run_time,
                    cache = %cache.path().display(),
                    "Updated time offset in cache"
                ),
                Err(e) => warn!(
                    stage = %self.name,
                    cache = %cache.path().display(),
                    error = %e,
                    "Failed to update time offset in cache"
                ),
            }
        }

        info!(stage = %self.name, contacts = page.results.len(), "Fetched contacts");
        Ok(page.results)
    }
}
