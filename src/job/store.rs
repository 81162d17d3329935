//! Durable snapshot of the non-terminal jobs, keyed by library id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::Library;
use crate::persist::{self, PersistError};

use super::Job;

/// File name of the job snapshot inside the work directory.
pub const JOB_STATE_FILE: &str = "jobs-imdb.json";

/// Job state could not be persisted or loaded.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing the snapshot failed.
    #[error("job state persistence failed: {0}")]
    Persist(#[from] PersistError),
}

/// The set of jobs that have not reached `Completed`.
///
/// Every mutation rewrites the whole snapshot atomically.
#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    jobs: BTreeMap<i64, Job>,
}

impl JobStore {
    /// Loads the snapshot at `path`. A missing file is an empty store.
    ///
    /// A snapshot that does not decode is discarded with a warning: every
    /// stage can be replayed from `Created`, so losing progress is safe.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file exists but cannot be read.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref().to_path_buf();
        let jobs: Vec<Job> = match persist::read_json(&path).await {
            Ok(jobs) => jobs.unwrap_or_default(),
            Err(PersistError::Json { source, .. }) => {
                warn!(error = %source, "Discarding undecodable job state");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        if !jobs.is_empty() {
            info!(jobs = jobs.len(), "Resuming persisted jobs");
        }
        for job in &jobs {
            debug!(
                library = job.key(),
                stage = %job.stage,
                created_at = %job.created_at,
                "Persisted job"
            );
        }
        Ok(Self {
            path,
            jobs: jobs.into_iter().map(|job| (job.key(), job)).collect(),
        })
    }

    /// Number of persisted jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Persisted job of library `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// Job to run for `library`: the persisted one, resuming at its stage,
    /// or a fresh one. The library description is refreshed either way.
    #[must_use]
    pub fn job_for(&self, library: &Library) -> Job {
        match self.jobs.get(&library.id) {
            Some(persisted) => {
                debug!(
                    library = library.id,
                    stage = %persisted.stage,
                    run_id = %persisted.run_id,
                    "Resuming persisted job"
                );
                let mut job = persisted.clone();
                job.library = library.clone();
                job
            }
            None => Job::new(library.clone()),
        }
    }

    /// Records `job` after a transition: a terminal job is removed, any
    /// other is inserted or replaced. The snapshot is rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the snapshot cannot be written.
    pub async fn save(&mut self, job: &Job) -> Result<(), StateError> {
        if job.stage.is_terminal() {
            self.jobs.remove(&job.key());
        } else {
            self.jobs.insert(job.key(), job.clone());
        }
        self.flush().await
    }

    /// Rewrites the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the snapshot cannot be written.
    pub async fn flush(&self) -> Result<(), StateError> {
        let jobs: Vec<&Job> = self.jobs.values().collect();
        persist::write_json_atomic(&self.path, &jobs).await?;
        Ok(())
    }
}
