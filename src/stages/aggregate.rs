//! Group-by aggregation over map records.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::record::{Record, RecordMap};
use crate::stage::{Stage, StageConfig};

/// Registry tag for [`AggregateStage`].
pub const STAGE_TYPE: &str = "aggregate";

/// Supported aggregations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    /// Number of records per group, emitted as `count`.
    Count,
    /// Sum of a numeric field per group, emitted as `sum`.
    Sum { field: String },
}

impl Aggregation {
    fn output_key(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum { .. } => "sum",
        }
    }
}

/// Groups records by `groupByField` and emits one record per group.
///
/// Config keys: `groupByField` (required), `aggregationType` (`count` or
/// `sum`, case-insensitive, default `count`), `sumField` (required for `sum`).
///
/// Each batch is aggregated on its own. Records that are not maps or lack
/// the group field are skipped. Groups are emitted in first-seen order.
pub struct AggregateStage {
    name: String,
    group_by: String,
    aggregation: Aggregation,
}

impl AggregateStage {
    /// Builds the stage from its config.
    ///
    /// # Errors
    /// Returns `StageError::MissingConfig` if `groupByField` (or `sumField`
    /// for sums) is absent, or `StageError::UnsupportedAggregation` for an
    /// unknown `aggregationType`.
    pub fn new(name: &str, config: &StageConfig) -> Result<Self, StageError> {
        let group_by = config.required_str("groupByField")?.to_string();
        let kind = config
            .optional_str("aggregationType")?
            .unwrap_or("count")
            .to_lowercase();

        let aggregation = match kind.as_str() {
            "count" => Aggregation::Count,
            "sum" => Aggregation::Sum {
                field: config.required_str("sumField")?.to_string(),
            },
            _ => return Err(StageError::UnsupportedAggregation(kind)),
        };

        debug!(stage = %name, group_by = %group_by, aggregation = ?aggregation, "Initialized aggregate stage");

        Ok(Self {
            name: name.to_string(),
            group_by,
            aggregation,
        })
    }

    /// Returns the configured aggregation.
    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }
}

/// Accumulated value for one group key.
struct Group {
    key: Value,
    count: u64,
    sum: f64,
}

#[async_trait]
impl Stage for AggregateStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        if records.is_empty() {
            debug!(stage = %self.name, "No records to aggregate");
            return Ok(Vec::new());
        }

        let input = records.len();
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut skipped = 0usize;

        for (position, record) in records.iter().enumerate() {
            let Some(map) = record.as_object() else {
                debug!(stage = %self.name, record = position, "Skipping non-map record");
                skipped += 1;
                continue;
            };
            let Some(key) = map.get(&self.group_by) else {
                debug!(stage = %self.name, record = position, field = %self.group_by, "Skipping record without group field");
                skipped += 1;
                continue;
            };

            let amount = match &self.aggregation {
                Aggregation::Count => 0.0,
                Aggregation::Sum { field } => match map.get(field).and_then(Value::as_f64) {
                    Some(amount) => amount,
                    None => {
                        debug!(stage = %self.name, record = position, field = %field, "Skipping record without numeric sum field");
                        skipped += 1;
                        continue;
                    }
                },
            };

            // Serialized form keys the group so any value shape can be grouped.
            let slot = *index.entry(key.to_string()).or_insert_with(|| {
                groups.push(Group {
                    key: key.clone(),
                    count: 0,
                    sum: 0.0,
                });
                groups.len() - 1
            });
            groups[slot].count += 1;
            groups[slot].sum += amount;
        }

        if skipped > 0 {
            warn!(stage = %self.name, skipped = skipped, "Skipped records during aggregation");
        }

        let output_key = self.aggregation.output_key();
        let output: Vec<Record> = groups
            .into_iter()
            .map(|group| {
                let mut out = RecordMap::new();
                out.insert(self.group_by.clone(), group.key);
                let value = match self.aggregation {
                    Aggregation::Count => Value::from(group.count),
                    Aggregation::Sum { .. } => sum_value(group.sum),
                };
                out.insert(output_key.to_string(), value);
                Record::Object(out)
            })
            .collect();

        info!(
            stage = %self.name,
            input_items = input,
            groups = output.len(),
            "Aggregation complete"
        );
        Ok(output)
    }
}

/// Integral sums are emitted as integers.
fn sum_value(sum: f64) -> Value {
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        Value::from(sum as i64)
    } else {
        Value::from(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count_by_user() -> AggregateStage {
        AggregateStage::new("Agg", &StageConfig::new().with("groupByField", "UserID")).unwrap()
    }

    #[tokio::test]
    async fn test_count_by_field() {
        let records = vec![
            json!({"UserID": "a"}),
            json!({"UserID": "b"}),
            json!({"UserID": "a"}),
            json!({"UserID": "c"}),
            json!({"Other": "x"}),
        ];

        let out = count_by_user()
            .process(&CancellationToken::new(), records)
            .await
            .unwrap();

        let counts: HashMap<String, u64> = out
            .iter()
            .map(|r| {
                (
                    r["UserID"].as_str().unwrap().to_string(),
                    r["count"].as_u64().unwrap(),
                )
            })
            .collect();
        let expected: HashMap<String, u64> =
            [("a", 2), ("b", 1), ("c", 1)].into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        assert_eq!(counts, expected);
    }

    #[tokio::test]
    async fn test_non_map_records_skipped() {
        let out = count_by_user()
            .process(
                &CancellationToken::new(),
                vec![json!("text"), json!(5), json!({"UserID": 7})],
            )
            .await
            .unwrap();

        assert_eq!(out, vec![json!({"UserID": 7, "count": 1})]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out = count_by_user()
            .process(&CancellationToken::new(), Vec::new())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_sum() {
        let config = StageConfig::new()
            .with("groupByField", "UserID")
            .with("aggregationType", "SUM")
            .with("sumField", "amount");
        let stage = AggregateStage::new("Sum", &config).unwrap();
        assert_eq!(
            stage.aggregation(),
            &Aggregation::Sum {
                field: "amount".to_string()
            }
        );

        let out = stage
            .process(
                &CancellationToken::new(),
                vec![
                    json!({"UserID": "a", "amount": 2}),
                    json!({"UserID": "a", "amount": 3}),
                    json!({"UserID": "b", "amount": 1.5}),
                    json!({"UserID": "b", "amount": "n/a"}),
                ],
            )
            .await
            .unwrap();

        assert_eq!(
            out,
            vec![
                json!({"UserID": "a", "sum": 5}),
                json!({"UserID": "b", "sum": 1.5}),
            ]
        );
    }

    #[test]
    fn test_aggregation_type_is_case_insensitive() {
        let config = StageConfig::new()
            .with("groupByField", "UserID")
            .with("aggregationType", "Count");
        let stage = AggregateStage::new("Agg", &config).unwrap();
        assert_eq!(stage.aggregation(), &Aggregation::Count);
    }

    #[test]
    fn test_missing_group_field() {
        let result = AggregateStage::new("Agg", &StageConfig::new());
        assert!(matches!(result, Err(StageError::MissingConfig { ref key }) if key == "groupByField"));
    }

    #[test]
    fn test_unsupported_aggregation() {
        let config = StageConfig::new()
            .with("groupByField", "UserID")
            .with("aggregationType", "median");
        let result = AggregateStage::new("Agg", &config);
        assert!(matches!(result, Err(StageError::UnsupportedAggregation(ref kind)) if kind == "median"));
    }
}
