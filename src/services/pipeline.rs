//! Iteration pipeline controller.
//!
//! Drives one job through N sequential iterations. Each iteration describes
//! the current image, generates a new image from that description, copies the
//! result into durable storage, records it to every sink and broadcasts
//! progress. The stored image then becomes the next iteration's input.
//!
//! Failure policy per iteration:
//! - no description, or an incomplete generation result: the iteration is
//!   skipped and the next one runs on the same input image;
//! - the generated image cannot be persisted: there is no new image to feed
//!   forward, so the job stops;
//! - sink and broadcast failures are logged and never affect the results.
//!
//! Failed iterations are not retried and their numbers are not reused.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::models::iteration::{IterationRecord, IterationResult};
use crate::models::progress::ProgressEvent;
use crate::services::broadcast::ProgressBroadcaster;
use crate::services::description::ImageDescriber;
use crate::services::generation::ImageGenerator;
use crate::services::sink::SinkFanout;
use crate::services::storage::ArtifactStore;

/// Why an iteration produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    NoDescription,
    GenerationFailed,
    PersistFailed,
}

/// Decision reached for one iteration.
#[derive(Debug)]
enum IterationOutcome {
    Completed {
        result: IterationResult,
        next_image: Vec<u8>,
    },
    /// Skip this iteration number and keep the current image.
    Skipped(SkipReason),
    /// Stop the job: no image is available to continue from.
    Abort(SkipReason),
}

/// Ephemeral per-job state, owned by a single `run` call.
struct PipelineState {
    current_image: Vec<u8>,
    completed: Vec<IterationResult>,
}

pub struct IterationPipeline {
    describer: Arc<dyn ImageDescriber>,
    generator: Arc<dyn ImageGenerator>,
    artifacts: Arc<dyn ArtifactStore>,
    sinks: Arc<SinkFanout>,
    broadcaster: Arc<dyn ProgressBroadcaster>,
    step_timeout: Duration,
}

impl IterationPipeline {
    pub fn new(
        describer: Arc<dyn ImageDescriber>,
        generator: Arc<dyn ImageGenerator>,
        artifacts: Arc<dyn ArtifactStore>,
        sinks: Arc<SinkFanout>,
        broadcaster: Arc<dyn ProgressBroadcaster>,
    ) -> Self {
        Self {
            describer,
            generator,
            artifacts,
            sinks,
            broadcaster,
            step_timeout: Duration::from_secs(180),
        }
    }

    /// Bound each describe/generate/persist step; a step that times out is
    /// treated as having returned nothing.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Run `iteration_count` iterations starting from `seed_image`.
    ///
    /// Returns only the iterations that completed, in order. The result may be
    /// shorter than `iteration_count`.
    pub async fn run(
        &self,
        seed_image: Vec<u8>,
        iteration_count: u32,
        job_id: Uuid,
    ) -> Result<Vec<IterationResult>, PipelineError> {
        if iteration_count == 0 {
            return Err(PipelineError::InvalidIterationCount);
        }
        if seed_image.is_empty() {
            return Err(PipelineError::EmptySeed);
        }

        metrics::counter!("pipeline_jobs_total").increment(1);
        tracing::info!(job_id = %job_id, iterations = iteration_count, "Starting pipeline");

        let mut state = PipelineState {
            current_image: seed_image,
            completed: Vec::new(),
        };

        for number in 1..=iteration_count {
            let started = Instant::now();

            match self.run_iteration(job_id, number, &state.current_image).await {
                IterationOutcome::Completed { result, next_image } => {
                    metrics::counter!("iterations_completed_total").increment(1);
                    metrics::histogram!("iteration_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    state.completed.push(result);
                    if number < iteration_count {
                        state.current_image = next_image;
                    }
                }
                IterationOutcome::Skipped(reason) => {
                    let reason: &'static str = reason.into();
                    metrics::counter!("iterations_skipped_total", "reason" => reason).increment(1);
                    tracing::warn!(job_id = %job_id, iteration = number, reason, "Iteration skipped");
                }
                IterationOutcome::Abort(reason) => {
                    let reason: &'static str = reason.into();
                    metrics::counter!("iterations_skipped_total", "reason" => reason).increment(1);
                    metrics::counter!("pipeline_jobs_aborted_total").increment(1);
                    tracing::error!(
                        job_id = %job_id,
                        iteration = number,
                        reason,
                        "No new image to continue from, stopping job"
                    );
                    break;
                }
            }
        }

        tracing::info!(
            job_id = %job_id,
            requested = iteration_count,
            completed = state.completed.len(),
            "Pipeline finished"
        );

        Ok(state.completed)
    }

    async fn run_iteration(&self, job_id: Uuid, number: u32, image: &[u8]) -> IterationOutcome {
        let Some(description) = self.bounded(self.describer.describe(image)).await.flatten() else {
            tracing::error!(job_id = %job_id, iteration = number, "No description generated");
            return IterationOutcome::Skipped(SkipReason::NoDescription);
        };

        let Some(generated) = self.bounded(self.generator.generate(&description)).await.flatten()
        else {
            tracing::error!(job_id = %job_id, iteration = number, "Image generation failed");
            return IterationOutcome::Skipped(SkipReason::GenerationFailed);
        };

        let Some(artifact) = self.bounded(self.artifacts.persist(&generated.url)).await.flatten()
        else {
            tracing::error!(job_id = %job_id, iteration = number, "Failed to persist generated image");
            return IterationOutcome::Abort(SkipReason::PersistFailed);
        };

        // One timestamp per iteration, shared by the result and every sink write.
        let result = IterationResult {
            iteration_number: number,
            description,
            image_url: artifact.url,
            revised_prompt: generated.revised_prompt,
            timestamp: Utc::now(),
        };

        let outcomes = self.sinks.record(&IterationRecord::new(job_id, &result)).await;
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        if failed > 0 {
            tracing::warn!(
                job_id = %job_id,
                iteration = number,
                failed,
                total = outcomes.len(),
                "Some sinks did not record the iteration"
            );
        }

        let event = ProgressEvent {
            iteration_number: number,
            image_url: result.image_url.clone(),
            description: result.description.clone(),
        };
        match self.broadcaster.publish(event) {
            Ok(receivers) => {
                tracing::debug!(job_id = %job_id, iteration = number, receivers, "Progress broadcast")
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, iteration = number, error = %e, "Progress not delivered")
            }
        }

        IterationOutcome::Completed {
            result,
            next_image: artifact.bytes,
        }
    }

    async fn bounded<T>(&self, step: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.step_timeout, step).await {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(timeout = ?self.step_timeout, "Pipeline step timed out");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Iteration count must be at least 1")]
    InvalidIterationCount,

    #[error("Seed image is empty")]
    EmptySeed,
}
