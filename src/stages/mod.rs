//! Built-in stage implementations.
//!
//! | Type tag               | Stage                                      |
//! |------------------------|--------------------------------------------|
//! | `import_contacts`      | Static contact import with a run-date cache |
//! | `import_events`        | JSON-lines event file import               |
//! | `import_http_contacts` | Incremental contact import over HTTP       |
//! | `aggregate`            | Group-by count or sum                      |
//! | `uppercase`            | Uppercase one string field                 |
//! | `persist`              | Simulated document store insert            |
//! | `export`               | Simulated export                           |
//! | `generate`             | Synthetic record generator                 |

pub mod aggregate;
pub mod export;
pub mod generate;
pub mod import_contacts;
pub mod import_events;
pub mod import_http;
pub mod persist;
pub mod uppercase;

pub use aggregate::AggregateStage;
pub use export::ExportStage;
pub use generate::GenerateStage;
pub use import_contacts::ImportContactsStage;
pub use import_events::ImportEventsStage;
pub use import_http::ImportHttpContactsStage;
pub use persist::PersistStage;
pub use uppercase::UppercaseStage;

use std::path::PathBuf;

use tracing::warn;

use crate::cache::FileCache;
use crate::error::StageError;
use crate::registry::StageRegistry;
use crate::stage::StageConfig;

/// Registers every built-in stage type with `registry`.
pub fn register_builtin_stages(registry: &StageRegistry) {
    registry.register(import_contacts::STAGE_TYPE, ImportContactsStage::new);
    registry.register(import_events::STAGE_TYPE, ImportEventsStage::new);
    registry.register(import_http::STAGE_TYPE, ImportHttpContactsStage::new);
    registry.register(aggregate::STAGE_TYPE, AggregateStage::new);
    registry.register(uppercase::STAGE_TYPE, UppercaseStage::new);
    registry.register(persist::STAGE_TYPE, PersistStage::new);
    registry.register(export::STAGE_TYPE, ExportStage::new);
    registry.register(generate::STAGE_TYPE, GenerateStage::new);
}

/// Default cache location for a stage without `cacheFilePath`.
pub fn default_cache_path(stage: &str) -> PathBuf {
    PathBuf::from(format!("./cache/{}_cache.json", stage))
}

/// Opens the cache configured by `cacheFilePath`.
///
/// A cache that cannot be opened is logged and skipped; the stage then runs
/// without incremental state.
///
/// # Errors
/// Returns `StageError::InvalidConfig` if `cacheFilePath` is not a string.
pub(crate) fn open_stage_cache(
    stage: &str,
    config: &StageConfig,
) -> Result<Option<FileCache>, StageError> {
    let path = config
        .optional_str("cacheFilePath")?
        .map(PathBuf::from)
        .unwrap_or_else(|| default_cache_path(stage));

    match FileCache::open(&path) {
        Ok(cache) => Ok(Some(cache)),
        Err(e) => {
            warn!(
                stage = %stage,
                path = %path.display(),
                error = %e,
                "Could not open cache, continuing without it"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_stages_registered() {
        let registry = StageRegistry::with_builtin_stages();
        assert_eq!(
            registry.stage_types(),
            vec![
                "aggregate",
                "export",
                "generate",
                "import_contacts",
                "import_events",
                "import_http_contacts",
                "persist",
                "uppercase",
            ]
        );
    }

    #[test]
    fn test_default_cache_path() {
        assert_eq!(
            default_cache_path("ImportContacts"),
            PathBuf::from("./cache/ImportContacts_cache.json")
        );
    }

    #[test]
    fn test_unreadable_cache_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "not json").unwrap();
        let config = StageConfig::new().with("cacheFilePath", path.to_string_lossy().to_string());

        let cache = open_stage_cache("Import", &config).unwrap();
        assert!(cache.is_none());
    }

    #[test]
    fn test_cache_path_must_be_string() {
        let config = StageConfig::new().with("cacheFilePath", 42);
        assert!(matches!(
            open_stage_cache("Import", &config),
            Err(StageError::InvalidConfig { .. })
        ));
    }
}
