//! Pipeline orchestrator for running a linear sequence of stages.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Stage resolution through the [`StageRegistry`]
//! - Batched stage execution through the [`StageRunner`]
//! - Threading each stage's output into the next stage
//! - Per-stage run reporting

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::error::RegistryError;
use crate::record::Record;
use crate::registry::StageRegistry;
use crate::stage::StageSpec;

use super::runner::{BatchPlan, RunnerError, StageRunner};

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage could not be resolved from the registry.
    #[error("Pipeline '{pipeline}': failed to resolve stage {index} '{stage}': {source}")]
    Resolve {
        pipeline: String,
        stage: String,
        index: usize,
        #[source]
        source: RegistryError,
    },

    /// A stage failed while processing its input.
    #[error("Pipeline '{pipeline}': stage {index} '{stage}' failed: {source}")]
    StageFailed {
        pipeline: String,
        stage: String,
        index: usize,
        #[source]
        source: RunnerError,
    },
}

impl PipelineError {
    /// Name of the stage that failed.
    pub fn stage(&self) -> &str {
        match self {
            PipelineError::Resolve { stage, .. } | PipelineError::StageFailed { stage, .. } => {
                stage
            }
        }
    }

    /// Zero-based index of the stage that failed.
    pub fn index(&self) -> usize {
        match self {
            PipelineError::Resolve { index, .. } | PipelineError::StageFailed { index, .. } => {
                *index
            }
        }
    }
}

/// Summary of one stage within a completed pipeline run.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub stage_type: String,
    pub input_items: usize,
    pub output_items: usize,
    pub batches: usize,
    pub duration: Duration,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Unique identifier for this run.
    pub run_id: Uuid,
    pub pipeline: String,
    /// Output of the final stage.
    pub records: Vec<Record>,
    /// Reports in stage order.
    pub stages: Vec<StageReport>,
    pub duration: Duration,
}

/// Runs pipelines stage by stage.
///
/// Stages are resolved fresh for every run and discarded once they finish.
pub struct PipelineOrchestrator {
    registry: Arc<StageRegistry>,
    runner: StageRunner,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over `registry` with the default runner.
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            runner: StageRunner::default(),
        }
    }

    /// Replaces the stage runner.
    pub fn with_runner(mut self, runner: StageRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Runs `stages` in order, starting from an empty record set.
    ///
    /// An empty stage list completes immediately with no records.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Resolve` if a stage type cannot be resolved,
    /// or `PipelineError::StageFailed` if a stage fails. No later stage runs
    /// after an error.
    pub async fn run_pipeline(
        &self,
        cancel: &CancellationToken,
        pipeline: &str,
        stages: &[StageSpec],
    ) -> Result<PipelineRun, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", pipeline = %pipeline, run_id = %run_id);

        async move {
            let start = Instant::now();
            info!(stages = stages.len(), "Starting pipeline");

            let mut records: Vec<Record> = Vec::new();
            let mut reports = Vec::with_capacity(stages.len());

            for (index, spec) in stages.iter().enumerate() {
                let stage = self.registry.resolve(spec).map_err(|source| {
                    error!(
                        stage = %spec.name,
                        stage_index = index,
                        error = %source,
                        "Failed to resolve stage"
                    );
                    PipelineError::Resolve {
                        pipeline: pipeline.to_string(),
                        stage: spec.name.clone(),
                        index,
                        source,
                    }
                })?;

                info!(
                    stage = %spec.name,
                    stage_type = %spec.stage_type,
                    stage_index = index,
                    "Starting stage"
                );

                let stage_start = Instant::now();
                let input_items = records.len();
                let output = self
                    .runner
                    .run(stage, records, BatchPlan::from_spec(spec), cancel)
                    .await
                    .map_err(|source| {
                        error!(
                            stage = %spec.name,
                            stage_index = index,
                            error = %source,
                            "Stage failed"
                        );
                        PipelineError::StageFailed {
                            pipeline: pipeline.to_string(),
                            stage: spec.name.clone(),
                            index,
                            source,
                        }
                    })?;

                let duration = stage_start.elapsed();
                info!(
                    stage = %spec.name,
                    stage_index = index,
                    input_items = input_items,
                    output_items = output.records.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Finished stage"
                );

                reports.push(StageReport {
                    name: spec.name.clone(),
                    stage_type: spec.stage_type.clone(),
                    input_items,
                    output_items: output.records.len(),
                    batches: output.batches,
                    duration,
                });
                records = output.records;
            }

            let duration = start.elapsed();
            info!(
                records = records.len(),
                duration_ms = duration.as_millis() as u64,
                "Pipeline completed"
            );

            Ok::<_, PipelineError>(PipelineRun {
                run_id,
                pipeline: pipeline.to_string(),
                records,
                stages: reports,
                duration,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::stage::{Stage, StageConfig};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits `count` numbers on empty input, otherwise appends a tag to strings.
    struct TagStage {
        name: String,
        tag: String,
        count: u64,
    }

    #[async_trait]
    impl Stage for TagStage {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process(
            &self,
            _cancel: &CancellationToken,
            records: Vec<Record>,
        ) -> Result<Vec<Record>, StageError> {
            if records.is_empty() {
                return Ok((0..self.count).map(|i| json!(i.to_string())).collect());
            }
            Ok(records
                .into_iter()
                .map(|r| json!(format!("{}{}", r.as_str().unwrap_or_default(), self.tag)))
                .collect())
        }
    }

    struct FailStage;

    #[async_trait]
    impl Stage for FailStage {
        fn name(&self) -> &str {
            "fail"
        }

        async fn process(
            &self,
            _cancel: &CancellationToken,
            _records: Vec<Record>,
        ) -> Result<Vec<Record>, StageError> {
            Err(StageError::processing("always fails"))
        }
    }

    fn registry(constructed: Arc<AtomicUsize>) -> Arc<StageRegistry> {
        let registry = StageRegistry::new();
        registry.register("tag", move |name: &str, config: &StageConfig| {
            constructed.fetch_add(1, Ordering::SeqCst);
            Ok(TagStage {
                name: name.to_string(),
                tag: config.optional_str("tag")?.unwrap_or("").to_string(),
                count: config.optional_u64("count")?.unwrap_or(0),
            })
        });
        registry.register("fail", |_name: &str, _config: &StageConfig| Ok(FailStage));
        Arc::new(registry)
    }

    fn tag(name: &str, tag: &str) -> StageSpec {
        StageSpec::new(name, "tag")
            .with_config(StageConfig::new().with("tag", tag).with("count", 3))
    }

    #[tokio::test]
    async fn test_empty_pipeline_succeeds() {
        let orchestrator = PipelineOrchestrator::new(registry(Arc::default()));
        let run = orchestrator
            .run_pipeline(&CancellationToken::new(), "empty", &[])
            .await
            .unwrap();

        assert!(run.records.is_empty());
        assert!(run.stages.is_empty());
        assert_eq!(run.pipeline, "empty");
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let orchestrator = PipelineOrchestrator::new(registry(Arc::default()));
        let stages = vec![tag("First", ""), tag("Second", "a"), tag("Third", "b")];

        let run = orchestrator
            .run_pipeline(&CancellationToken::new(), "ordered", &stages)
            .await
            .unwrap();

        assert_eq!(run.records, vec![json!("0ab"), json!("1ab"), json!("2ab")]);
        let names: Vec<&str> = run.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);
        assert_eq!(run.stages[0].input_items, 0);
        assert_eq!(run.stages[1].input_items, 3);
        assert_eq!(run.stages[2].output_items, 3);
    }

    #[tokio::test]
    async fn test_unknown_stage_type_aborts() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let orchestrator = PipelineOrchestrator::new(registry(Arc::clone(&constructed)));
        let stages = vec![
            tag("First", ""),
            StageSpec::new("Mystery", "nope"),
            tag("Never", "x"),
        ];

        let err = orchestrator
            .run_pipeline(&CancellationToken::new(), "broken", &stages)
            .await
            .unwrap_err();

        match &err {
            PipelineError::Resolve {
                pipeline,
                stage,
                index,
                source: RegistryError::UnknownStageType { stage_type },
            } => {
                assert_eq!(pipeline, "broken");
                assert_eq!(stage, "Mystery");
                assert_eq!(*index, 1);
                assert_eq!(stage_type, "nope");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stage_failure_aborts() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let orchestrator = PipelineOrchestrator::new(registry(Arc::clone(&constructed)));
        let stages = vec![
            tag("First", ""),
            StageSpec::new("Breaks", "fail"),
            tag("Never", "x"),
        ];

        let err = orchestrator
            .run_pipeline(&CancellationToken::new(), "failing", &stages)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::StageFailed { .. }));
        assert_eq!(err.stage(), "Breaks");
        assert_eq!(err.index(), 1);
        assert!(err.to_string().contains("failing"));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }
}
