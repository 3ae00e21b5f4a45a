//! File-backed key-value cache for state carried between pipeline runs.
//!
//! The whole mapping is loaded into memory on [`FileCache::open`] and the
//! backing file is rewritten in full on every mutation. Reads never touch
//! disk.
//!
//! The file is not locked against other processes; two processes writing
//! the same path will overwrite each other.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::error::CacheError;

/// Durable string-to-string cache backed by a single JSON file.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl FileCache {
    /// Open the cache at `path`, loading existing entries.
    ///
    /// A missing file yields an empty cache; the file and its parent
    /// directories are created on the first write.
    ///
    /// # Errors
    /// Returns `CacheError::Read` if the file exists but cannot be read, or
    /// `CacheError::Parse` if it is not a flat JSON string mapping.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<HashMap<String, String>>(&contents)
                .map_err(|source| CacheError::Parse {
                    path: path.clone(),
                    source,
                })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        debug!(path = %path.display(), entries = entries.len(), "Opened cache");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Look up a value. Does not touch disk.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .expect("cache read lock poisoned")
            .get(key)
            .cloned()
    }

    /// Store a value and rewrite the backing file before returning.
    ///
    /// # Errors
    /// Returns a `CacheError` if the file cannot be written. The in-memory
    /// value is updated either way.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), CacheError> {
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        entries.insert(key.into(), value.into());
        self.persist(&entries)
    }

    /// Remove a value and rewrite the backing file before returning.
    ///
    /// # Errors
    /// Returns a `CacheError` if the file cannot be written.
    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().expect("cache write lock poisoned");
        entries.remove(key);
        self.persist(&entries)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache read lock poisoned").len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize `entries` and atomically replace the backing file.
    ///
    /// Called with the write lock held so file contents follow mutation order.
    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        let sorted: BTreeMap<&String, &String> = entries.iter().collect();
        let contents =
            serde_json::to_string_pretty(&sorted).map_err(|source| CacheError::Serialize {
                path: self.path.clone(),
                source,
            })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|source| self.write_error(source))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.write_error(e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| self.write_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.write_error(e.error))?;

        debug!(path = %self.path.display(), entries = entries.len(), "Persisted cache");
        Ok(())
    }

    fn write_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
