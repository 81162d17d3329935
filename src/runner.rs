//! Drives one job through the pipeline.
//!
//! The runner is the only place where a job's stage moves forward. After
//! every successful handler it advances the stage and rewrites the job
//! snapshot; a job reaching `Completed` is dropped from the snapshot. On a
//! failure the (possibly shrunk) working set is still saved, then the failure
//! is classified into a [`JobOutcome`].

use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::dataset::RatingDataset;
use crate::job::{Job, JobStore, Stage, StateError};
use crate::pipeline::{Pipeline, Severity, StageError};

/// What went wrong inside a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// A stage handler failed.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// The job snapshot could not be written.
    #[error(transparent)]
    State(#[from] StateError),
}

/// A failed job with enough context to diagnose it from the log alone.
#[derive(Debug, Error)]
#[error("library {library} ('{name}') failed at stage {stage} (run {run_id}): {source}")]
pub struct JobFailure {
    /// Library id.
    pub library: i64,
    /// Library name.
    pub name: String,
    /// Stage whose handler was running.
    pub stage: Stage,
    /// Run token of the job.
    pub run_id: Uuid,
    /// The underlying failure.
    #[source]
    pub source: JobError,
}

impl JobFailure {
    fn new(job: &Job, source: impl Into<JobError>) -> Self {
        Self {
            library: job.library.id,
            name: job.library.name.clone(),
            stage: job.stage,
            run_id: job.run_id,
            source: source.into(),
        }
    }

    /// Reach of the failure. Snapshot failures are always fatal.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match &self.source {
            JobError::Stage(e) => e.severity(),
            JobError::State(_) => Severity::Fatal,
        }
    }
}

/// Result of running one job.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job reached `Completed` and left the snapshot.
    Pass,
    /// Stop this cycle; the job stays persisted.
    AbortCycle(JobFailure),
    /// Stop the process.
    Fatal(JobFailure),
}

impl JobOutcome {
    fn from_failure(failure: JobFailure) -> Self {
        match failure.severity() {
            Severity::AbortCycle => Self::AbortCycle(failure),
            Severity::Fatal => Self::Fatal(failure),
        }
    }
}

/// Runs jobs to completion, one stage at a time.
#[derive(Debug)]
pub struct JobRunner {
    pipeline: Pipeline,
}

impl JobRunner {
    /// Runner over `pipeline`.
    #[must_use]
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Runs `job` from its current stage to `Completed`, persisting it in
    /// `store` after every transition.
    #[instrument(
        skip_all,
        fields(library = job.library.id, run_id = %job.run_id, kind = %job.library.kind)
    )]
    pub async fn run(
        &self,
        mut job: Job,
        dataset: &RatingDataset,
        store: &mut JobStore,
    ) -> JobOutcome {
        info!(name = %job.library.name, stage = %job.stage, "Processing library");

        while !job.stage.is_terminal() {
            let stage = job.stage;
            if let Err(stage_error) = self.pipeline.run_stage(&mut job, dataset).await {
                let failure = JobFailure::new(&job, stage_error);
                if let Err(state_error) = store.save(&job).await {
                    error!(%failure, "Stage failed and its state could not be saved");
                    return JobOutcome::Fatal(JobFailure::new(&job, state_error));
                }
                return JobOutcome::from_failure(failure);
            }

            job.advance();
            info!(from = %stage, to = %job.stage, items = job.items.len(), "Stage complete");

            if let Err(state_error) = store.save(&job).await {
                return JobOutcome::Fatal(JobFailure::new(&job, state_error));
            }
        }

        if !job.items.is_empty() {
            warn!(left = job.items.len(), "Job completed with items still pending");
        }
        info!(name = %job.library.name, "Library is up to date");
        JobOutcome::Pass
    }
}
