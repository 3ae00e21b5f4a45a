//! Records flowing between pipeline stages.
//!
//! A record is a tagged value: string, number, boolean, null, sequence or a
//! string-keyed mapping. Stages agree on no shared schema, so the engine never
//! inspects records; only stages do.

use serde_json::{Map, Value};

/// One opaque unit of data flowing through a pipeline.
pub type Record = Value;

/// The mapping shape most stages consume and emit.
pub type RecordMap = Map<String, Value>;

/// Builds a map record from `(field, value)` pairs.
pub fn record_from_pairs<K, V, I>(pairs: I) -> Record
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}
