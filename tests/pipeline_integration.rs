//! End-to-end tests for pipeline execution.
//!
//! These tests drive the public API: YAML configuration, the built-in stage
//! registry, and the orchestrator.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use flowforge::error::{RegistryError, StageError};
use flowforge::pipeline::{AppConfig, PipelineError, PipelineOrchestrator, RunnerError};
use flowforge::registry::StageRegistry;
use flowforge::stage::{Stage, StageConfig, StageSpec};
use flowforge::{FileCache, Record};
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn orchestrator() -> PipelineOrchestrator {
    PipelineOrchestrator::new(Arc::new(StageRegistry::with_builtin_stages()))
}

#[tokio::test]
async fn test_generate_then_uppercase() {
    let config = AppConfig::from_yaml_str(
        r#"
pipelines:
  demo:
    - name: Generate
      type: generate
      concurrency: 1
      batchSize: 2
      config:
        count: 5
        field: Name
        prefix: user
    - name: Upper
      type: uppercase
      concurrency: 1
      batchSize: 2
      config:
        uppercaseField: Name
"#,
    )
    .expect("config should parse");

    let stages = config.pipeline("demo").expect("pipeline exists");
    let run = orchestrator()
        .run_pipeline(&CancellationToken::new(), "demo", stages)
        .await
        .expect("pipeline should succeed");

    let names: Vec<&str> = run
        .records
        .iter()
        .map(|r| r["Name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["USER-0", "USER-1", "USER-2", "USER-3", "USER-4"]);

    assert_eq!(run.stages.len(), 2);
    assert_eq!(run.stages[0].name, "Generate");
    assert_eq!(run.stages[0].batches, 1);
    assert_eq!(run.stages[1].name, "Upper");
    assert_eq!(run.stages[1].input_items, 5);
    assert_eq!(run.stages[1].batches, 3);
}

#[tokio::test]
async fn test_events_aggregated_concurrently() {
    let dir = tempdir().unwrap();
    let events = dir.path().join("events.log");
    let mut lines = String::new();
    for i in 0..60 {
        let user = ["a", "b", "c"][i % 3];
        lines.push_str(&format!("{{\"UserID\":\"{}\",\"seq\":{}}}\n", user, i));
    }
    lines.push_str("{\"Other\":\"x\"}\nnot json\n");
    fs::write(&events, lines).unwrap();

    let stages = vec![
        StageSpec::new("ImportEvents", "import_events").with_config(
            StageConfig::new().with("sourceFile", events.to_string_lossy().to_string()),
        ),
        StageSpec::new("Aggregate", "aggregate")
            .with_concurrency(4)
            .with_config(StageConfig::new().with("groupByField", "UserID")),
    ];

    let run = orchestrator()
        .run_pipeline(&CancellationToken::new(), "analytics", &stages)
        .await
        .unwrap();

    let mut counts: Vec<(String, u64)> = run
        .records
        .iter()
        .map(|r| {
            (
                r["UserID"].as_str().unwrap().to_string(),
                r["count"].as_u64().unwrap(),
            )
        })
        .collect();
    counts.sort();
    assert_eq!(
        counts,
        vec![
            ("a".to_string(), 20),
            ("b".to_string(), 20),
            ("c".to_string(), 20)
        ]
    );
}

#[tokio::test]
async fn test_contacts_pipeline_with_cache() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("cache").join("contacts.json");

    let stages = vec![
        StageSpec::new("ImportContacts", "import_contacts").with_config(
            StageConfig::new().with("cacheFilePath", cache_path.to_string_lossy().to_string()),
        ),
        StageSpec::new("Upper", "uppercase")
            .with_concurrency(2)
            .with_batch_size(1)
            .with_ordered(true)
            .with_config(StageConfig::new().with("uppercaseField", "Name")),
        StageSpec::new("Persist", "persist").with_config(
            StageConfig::new()
                .with("database", "etl")
                .with("collection", "contacts"),
        ),
        StageSpec::new("Export", "export"),
    ];

    let run = orchestrator()
        .run_pipeline(&CancellationToken::new(), "contacts", &stages)
        .await
        .unwrap();

    assert_eq!(
        run.records,
        vec![
            json!({"Name": "ALICE", "Email": "alice@example.com"}),
            json!({"Name": "BOB", "Email": "bob@example.com"}),
            json!({"Name": "CHARLIE", "Email": "charlie@example.com"}),
        ]
    );

    let cache = FileCache::open(&cache_path).unwrap();
    assert!(cache.get("last_import_date").is_some());
}

#[tokio::test]
async fn test_unknown_stage_type_stops_pipeline() {
    let stages = vec![
        StageSpec::new("Generate", "generate"),
        StageSpec::new("Mystery", "does_not_exist"),
        StageSpec::new("Export", "export"),
    ];

    let err = orchestrator()
        .run_pipeline(&CancellationToken::new(), "broken", &stages)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Resolve {
            index: 1,
            source: RegistryError::UnknownStageType { .. },
            ..
        }
    ));
    assert!(err.to_string().contains("broken"));
    assert!(err.to_string().contains("Mystery"));
}

#[tokio::test]
async fn test_invalid_stage_config_stops_pipeline() {
    let stages = vec![
        StageSpec::new("Generate", "generate"),
        StageSpec::new("Aggregate", "aggregate"),
    ];

    let err = orchestrator()
        .run_pipeline(&CancellationToken::new(), "misconfigured", &stages)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Resolve {
            source: RegistryError::Construction {
                source: StageError::MissingConfig { .. },
                ..
            },
            ..
        }
    ));
}

#[tokio::test]
async fn test_empty_pipeline() {
    let run = orchestrator()
        .run_pipeline(&CancellationToken::new(), "empty", &[])
        .await
        .unwrap();
    assert!(run.records.is_empty());
    assert!(run.stages.is_empty());
}

/// Fails on a chosen record and counts how often later stages are built.
struct RejectStage {
    name: String,
    reject: Record,
}

#[async_trait]
impl Stage for RejectStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        _cancel: &CancellationToken,
        records: Vec<Record>,
    ) -> Result<Vec<Record>, StageError> {
        if records.iter().any(|r| r["id"] == self.reject) {
            return Err(StageError::processing("rejected record"));
        }
        Ok(records)
    }
}

#[tokio::test]
async fn test_batch_failure_aborts_pipeline() {
    let registry = StageRegistry::with_builtin_stages();
    registry.register("reject", |name: &str, config: &StageConfig| {
        Ok(RejectStage {
            name: name.to_string(),
            reject: json!(config.optional_u64("id")?.unwrap_or(0)),
        })
    });
    let built_after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built_after);
    registry.register("tail", move |name: &str, _config: &StageConfig| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(RejectStage {
            name: name.to_string(),
            reject: Record::Null,
        })
    });

    let stages = vec![
        StageSpec::new("Generate", "generate").with_config(StageConfig::new().with("count", 20)),
        StageSpec::new("Reject", "reject")
            .with_concurrency(3)
            .with_batch_size(4)
            .with_config(StageConfig::new().with("id", 9)),
        StageSpec::new("Tail", "tail"),
    ];

    let err = PipelineOrchestrator::new(Arc::new(registry))
        .run_pipeline(&CancellationToken::new(), "rejecting", &stages)
        .await
        .unwrap_err();

    match err {
        PipelineError::StageFailed {
            pipeline,
            stage,
            index,
            source: RunnerError::BatchFailed { batch, batches, .. },
        } => {
            assert_eq!(pipeline, "rejecting");
            assert_eq!(stage, "Reject");
            assert_eq!(index, 1);
            assert_eq!(batch, 3);
            assert_eq!(batches, 5);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(built_after.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_before_run() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stages = vec![
        StageSpec::new("Generate", "generate"),
        StageSpec::new("Export", "export").with_batch_size(1),
    ];

    let err = orchestrator()
        .run_pipeline(&cancel, "interrupted", &stages)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::StageFailed {
            index: 1,
            source: RunnerError::Cancelled { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_demo_analytics_counts_each_user_once() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let config = AppConfig::load(root.join("demos").join("pipelines.yaml")).unwrap();

    let mut stages = config.pipeline("analytics").unwrap().to_vec();
    let events = root.join("demos").join("data").join("events.log");
    stages[0] = stages[0].clone().with_config(
        StageConfig::new().with("sourceFile", events.to_string_lossy().to_string()),
    );

    let run = orchestrator()
        .run_pipeline(&CancellationToken::new(), "analytics", &stages)
        .await
        .unwrap();

    assert_eq!(
        run.records,
        vec![
            json!({"UserID": "a", "count": 3}),
            json!({"UserID": "b", "count": 1}),
            json!({"UserID": "c", "count": 1}),
        ]
    );
}
