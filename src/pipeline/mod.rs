//! Stage handlers.
//!
//! [`Pipeline::run_stage`] executes the handler belonging to a job's current
//! stage. Handlers mutate the job's working set but never touch its stage;
//! advancing and persisting is the runner's job.
//!
//! | Stage at entry | Handler | Effect on the working set |
//! |---|---|---|
//! | `Created` | resolve | load items from the catalog, drop unresolvable ones |
//! | `Resolved` | accumulate | none (the full dataset is already in memory) |
//! | `Accumulated` | transform | drop items whose rating is current, apply new values |
//! | `Transformed` | commit to database | none |
//! | `DbUpdated` | commit to files | remove written and missing items |

mod error;
pub mod files;
pub mod retry;

pub use error::{FileUpdateError, Severity, StageError};
pub use files::{FilePhaseReport, FileUpdater, MissingFile};
pub use retry::{LockRetryError, LockRetryPolicy};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::dataset::RatingDataset;
use crate::job::{Job, Stage};
use crate::model::LibraryKind;
use crate::resolver::{Resolution, ResolverSet};

/// Directories holding the per-item metadata bundles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRoots {
    /// Bundles of movie items.
    pub movies: PathBuf,
    /// Bundles of series items.
    pub series: PathBuf,
}

impl MetadataRoots {
    /// The standard layout below a media server data directory.
    #[must_use]
    pub fn under(data_dir: &Path) -> Self {
        let metadata = data_dir.join("Metadata");
        Self {
            movies: metadata.join("Movies"),
            series: metadata.join("TV Shows"),
        }
    }

    /// Root for items of `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: LibraryKind) -> &Path {
        match kind {
            LibraryKind::Movie => &self.movies,
            LibraryKind::Series => &self.series,
        }
    }
}

/// The stage handlers and everything they need.
#[derive(Debug)]
pub struct Pipeline {
    catalog: Catalog,
    resolvers: ResolverSet,
    roots: MetadataRoots,
    report_dir: PathBuf,
    lock_retry: LockRetryPolicy,
    files: FileUpdater,
}

impl Pipeline {
    /// Builds a pipeline with the default lock retry policy and file phase.
    /// Missing-file reports are written to `report_dir`.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        resolvers: ResolverSet,
        roots: MetadataRoots,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            resolvers,
            roots,
            report_dir: report_dir.into(),
            lock_retry: LockRetryPolicy::default(),
            files: FileUpdater::default(),
        }
    }

    /// Overrides the lock retry policy.
    #[must_use]
    pub fn with_lock_retry(mut self, lock_retry: LockRetryPolicy) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    /// Overrides the file phase settings.
    #[must_use]
    pub fn with_file_updater(mut self, files: FileUpdater) -> Self {
        self.files = files;
        self
    }

    /// Runs the handler of `job`'s current stage. A terminal job is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`]; [`StageError::severity`] says how far it reaches.
    pub async fn run_stage(&self, job: &mut Job, dataset: &RatingDataset) -> Result<(), StageError> {
        match job.stage {
            Stage::Created => self.resolve(job).await,
            Stage::Resolved => {
                accumulate(job);
                Ok(())
            }
            Stage::Accumulated => {
                transform(job, dataset);
                Ok(())
            }
            Stage::Transformed => self.commit_database(job).await,
            Stage::DbUpdated => self.commit_files(job).await,
            Stage::Completed => Ok(()),
        }
    }

    /// Loads the library's items and resolves each to a canonical id.
    /// Items that do not resolve are dropped.
    ///
    /// The working set is replaced only on success, so a retried resolve
    /// always starts from a fresh read of the catalog.
    #[instrument(skip_all, fields(library = job.library.id, run_id = %job.run_id))]
    async fn resolve(&self, job: &mut Job) -> Result<(), StageError> {
        let connection = self.catalog.connect().await?;
        let loaded = connection.library_items(&job.library).await;
        connection.close().await;
        let loaded = loaded?;

        info!(items = loaded.len(), "Resolving IMDb identifiers");
        let total = loaded.len();
        let mut resolved = Vec::with_capacity(total);
        for mut item in loaded {
            match self.resolvers.resolve(&mut item, job.library.kind).await? {
                Resolution::Resolved => resolved.push(item),
                Resolution::Unresolved => {}
            }
        }

        let skipped = total - resolved.len();
        if skipped > 0 {
            info!(skipped, "Filtered unresolvable item(s)");
        }
        job.items = resolved;
        Ok(())
    }

    /// Writes the working set to the catalog, waiting out foreign locks.
    /// An empty working set succeeds without opening the catalog.
    #[instrument(skip_all, fields(library = job.library.id, items = job.items.len()))]
    async fn commit_database(&self, job: &mut Job) -> Result<(), StageError> {
        if job.items.is_empty() {
            info!("Nothing to update");
            return Ok(());
        }

        let items = &job.items;
        retry::write_with_lock_retry(&self.lock_retry, |_attempt| async move {
            let connection = self.catalog.connect().await?;
            let written = connection.batch_write(items).await;
            connection.close().await;
            written
        })
        .await
        .map_err(|e| match e {
            LockRetryError::Locked { attempts, .. } => StageError::DatabaseLocked {
                attempts,
                interval: self.lock_retry.interval(),
            },
            LockRetryError::Failed(error) => StageError::Catalog(error),
        })?;

        info!("Catalog database is up to date");
        Ok(())
    }

    /// Rewrites the items' `Info.xml` files. Written and missing items leave
    /// the working set even when another worker failed.
    #[instrument(skip_all, fields(library = job.library.id, items = job.items.len()))]
    async fn commit_files(&self, job: &mut Job) -> Result<(), StageError> {
        let root = self.roots.for_kind(job.library.kind);
        let report = self.files.run(root, &job.items).await;

        let settled: HashSet<i64> = report.settled_ids().collect();
        job.items.retain(|item| !settled.contains(&item.id));

        if !report.missing.is_empty() {
            let path = self
                .report_dir
                .join(files::missing_report_name(job.run_id, job.library.id));
            warn!(
                missing = report.missing.len(),
                report = %path.display(),
                "Some item files are not on disk; the catalog database still has the ratings"
            );
            if let Err(error) = files::write_missing_report(&path, &report.missing).await {
                warn!(%error, report = %path.display(), "Could not write missing-file report");
            }
        }

        match report.error {
            Some(error) => Err(error.into()),
            None => {
                info!(written = report.completed.len(), "Item files updated");
                Ok(())
            }
        }
    }
}

/// Nothing to gather: the full dataset is loaded once per cycle.
fn accumulate(job: &Job) {
    tracing::debug!(library = job.library.id, "Accumulation not needed");
}

/// Compares every item with the dataset. Items already carrying the dataset's
/// score and vote count, and items the dataset does not know, are dropped.
/// The rest get the dataset values applied.
fn transform(job: &mut Job, dataset: &RatingDataset) {
    let before = job.items.len();
    job.items.retain_mut(|item| {
        let Some(rating) = item.imdb_id.as_ref().and_then(|id| dataset.get(id)) else {
            return false;
        };
        if item.matches(&rating) {
            return false;
        }
        item.apply(&rating);
        true
    });

    let unchanged = before - job.items.len();
    info!(
        library = job.library.id,
        unchanged,
        changed = job.items.len(),
        "Transformed ratings"
    );
}
