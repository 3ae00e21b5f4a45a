//! Loosely-typed stage configuration with fail-fast accessors.
//!
//! Configuration values arrive from the pipeline document as arbitrary
//! values. Constructors pull what they need through the typed accessors,
//! which reject values of the wrong type instead of coercing them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StageError;

/// String-keyed configuration mapping for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageConfig(Map<String, Value>);

impl StageConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw access to a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of configured keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no keys are configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a string value. Absent, null and empty strings read as `None`.
    ///
    /// # Errors
    ///
    /// Returns `StageError::InvalidConfig` if the value is not a string.
    pub fn optional_str(&self, key: &str) -> Result<Option<&str>, StageError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    /// Returns a required, non-empty string value.
    ///
    /// # Errors
    ///
    /// Returns `StageError::MissingConfig` if absent or empty, or
    /// `StageError::InvalidConfig` if not a string.
    pub fn required_str(&self, key: &str) -> Result<&str, StageError> {
        self.optional_str(key)?.ok_or_else(|| StageError::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Returns a non-negative integer value.
    ///
    /// Floats are accepted when they carry no fractional part, since some
    /// document formats do not distinguish the two.
    ///
    /// # Errors
    ///
    /// Returns `StageError::InvalidConfig` for any other value.
    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, StageError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => {
                if let Some(v) = n.as_u64() {
                    return Ok(Some(v));
                }
                match n.as_f64() {
                    Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                        Ok(Some(f as u64))
                    }
                    _ => Err(invalid(key, "a non-negative integer")),
                }
            }
            Some(_) => Err(invalid(key, "a non-negative integer")),
        }
    }

    /// Returns a boolean value.
    ///
    /// # Errors
    ///
    /// Returns `StageError::InvalidConfig` if the value is not a boolean.
    pub fn optional_bool(&self, key: &str) -> Result<Option<bool>, StageError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(invalid(key, "a boolean")),
        }
    }
}

impl From<Map<String, Value>> for StageConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, expected: &'static str) -> StageError {
    StageError::InvalidConfig {
        key: key.to_string(),
        expected,
    }
}
