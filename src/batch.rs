//! One batch cycle over every eligible library.
//!
//! A cycle purges expired blacklist entries, lists the libraries, acquires
//! the rating dataset and then runs one job per library, strictly one after
//! the other. An abort-cycle failure stops the queue and leaves the
//! remaining jobs for the next cycle; a fatal failure is returned to the
//! caller, which ends the process.

use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::cache::Caches;
use crate::catalog::{Catalog, CatalogError, LibraryFilter};
use crate::dataset::{DatasetError, DatasetFetcher, RatingDataset};
use crate::job::JobStore;
use crate::model::Library;
use crate::pipeline::Severity;
use crate::runner::{JobFailure, JobOutcome, JobRunner};

/// Cycle-level failure.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The rating dataset could not be acquired.
    #[error("rating dataset unavailable: {0}")]
    Dataset(#[from] DatasetError),

    /// Libraries could not be listed.
    #[error("cannot list libraries: {0}")]
    Catalog(#[from] CatalogError),

    /// A job failed.
    #[error(transparent)]
    Job(#[from] JobFailure),
}

impl CycleError {
    /// Reach of the failure. Dataset problems and a busy catalog only abort
    /// the cycle.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Dataset(_) => Severity::AbortCycle,
            Self::Catalog(e) if e.is_busy() => Severity::AbortCycle,
            Self::Catalog(_) => Severity::Fatal,
            Self::Job(failure) => failure.severity(),
        }
    }
}

/// How a cycle ended, short of a fatal failure.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Every job passed.
    Completed {
        /// Jobs run to completion.
        jobs: usize,
    },
    /// No library passed the filter.
    NoLibraries,
    /// The cycle stopped early; pending jobs stay persisted.
    Aborted {
        /// Jobs completed before the abort.
        completed: usize,
        /// Why it stopped.
        error: CycleError,
    },
}

/// Inputs of a cycle that stay the same across cycles.
#[derive(Debug)]
pub struct BatchCycle {
    catalog: Catalog,
    filter: LibraryFilter,
    fetcher: DatasetFetcher,
    caches: Caches,
    runner: JobRunner,
}

impl BatchCycle {
    /// Assembles a cycle driver.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        filter: LibraryFilter,
        fetcher: DatasetFetcher,
        caches: Caches,
        runner: JobRunner,
    ) -> Self {
        Self {
            catalog,
            filter,
            fetcher,
            caches,
            runner,
        }
    }

    /// The caches shared with the resolvers.
    #[must_use]
    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] only for fatal failures; abort-cycle failures
    /// come back as [`CycleOutcome::Aborted`].
    #[instrument(skip_all)]
    pub async fn run(&self, store: &mut JobStore) -> Result<CycleOutcome, CycleError> {
        self.caches.purge_expired(Utc::now());

        if !self.filter.ignored.is_empty() {
            info!(ignored = ?self.filter.ignored, "Ignoring libraries");
        }

        let libraries = match self.list_libraries().await {
            Ok(libraries) => libraries,
            Err(error) => return classify(0, error.into()),
        };
        if libraries.is_empty() {
            info!("No libraries to update");
            return Ok(CycleOutcome::NoLibraries);
        }
        info!(libraries = libraries.len(), "Libraries to update");

        let dataset = match self.fetcher.acquire().await {
            Ok(dataset) => dataset,
            Err(error) => return classify(0, error.into()),
        };

        match self.process_queue(&libraries, &dataset, store).await {
            Ok(jobs) => {
                if let Err(error) = self.caches.flush_all().await {
                    warn!(%error, "Could not save resolution caches");
                }
                info!(jobs, "Cycle complete");
                Ok(CycleOutcome::Completed { jobs })
            }
            Err((completed, error)) => classify(completed, error),
        }
    }

    async fn list_libraries(&self) -> Result<Vec<Library>, CatalogError> {
        let connection = self.catalog.connect().await?;
        let libraries = connection.list_libraries(&self.filter).await;
        connection.close().await;
        libraries
    }

    async fn process_queue(
        &self,
        libraries: &[Library],
        dataset: &RatingDataset,
        store: &mut JobStore,
    ) -> Result<usize, (usize, CycleError)> {
        let mut queue: VecDeque<_> = libraries.iter().map(|lib| store.job_for(lib)).collect();
        let mut completed = 0;

        while let Some(job) = queue.pop_front() {
            match self.runner.run(job, dataset, store).await {
                JobOutcome::Pass => completed += 1,
                JobOutcome::AbortCycle(failure) | JobOutcome::Fatal(failure) => {
                    if !queue.is_empty() {
                        info!(pending = queue.len(), "Remaining libraries wait for the next cycle");
                    }
                    return Err((completed, failure.into()));
                }
            }
        }
        Ok(completed)
    }
}

fn classify(completed: usize, error: CycleError) -> Result<CycleOutcome, CycleError> {
    match error.severity() {
        Severity::AbortCycle => {
            warn!(%error, "Cycle aborted; retrying on the next run");
            Ok(CycleOutcome::Aborted { completed, error })
        }
        Severity::Fatal => {
            error!(%error, "Fatal error during cycle");
            Err(error)
        }
    }
}
