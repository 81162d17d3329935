//! Stage failures and their classification.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::resolver::LookupError;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stop the current cycle; pending jobs stay persisted for the next one.
    AbortCycle,
    /// Stop the process.
    Fatal,
}

/// Unexpected failure in the per-item file phase. Missing files are not
/// errors; they are collected and reported separately.
#[derive(Debug, Error)]
pub enum FileUpdateError {
    /// Reading or writing an item file failed.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file has no element to carry the rating.
    #[error("no root element in {path}")]
    MalformedXml {
        /// The file involved.
        path: PathBuf,
    },

    /// A worker panicked.
    #[error("file worker panicked: {0}")]
    WorkerPanicked(String),

    /// Workers did not finish within the bounded wait.
    #[error("file workers still running after {timeout:?} ({pending} slice(s) unfinished)")]
    TimedOut {
        /// The bound that was exceeded.
        timeout: Duration,
        /// Slices that had not reported back.
        pending: usize,
    },
}

/// A stage handler failed.
#[derive(Debug, Error)]
pub enum StageError {
    /// A remote lookup failed transiently.
    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),

    /// The catalog stayed locked for the whole retry budget.
    #[error(
        "catalog database still locked after {attempts} attempt(s) every {interval:?}\n  Suggestion: stop the media server or wait for the next cycle"
    )]
    DatabaseLocked {
        /// Attempts made.
        attempts: u32,
        /// Wait between attempts.
        interval: Duration,
    },

    /// A catalog operation failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The file phase hit an unexpected error.
    #[error("file update failed: {0}")]
    Files(#[from] FileUpdateError),
}

impl StageError {
    /// Maps the failure onto the cycle outcome.
    ///
    /// Transient lookups and lock exhaustion abort the cycle. A busy catalog
    /// outside the retry loop does too. Everything else is fatal.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Lookup(_) | Self::DatabaseLocked { .. } => Severity::AbortCycle,
            Self::Catalog(e) if e.is_busy() => Severity::AbortCycle,
            Self::Catalog(_) | Self::Files(_) => Severity::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogDbErrorKind;

    #[test]
    fn test_severity_classification() {
        let lookup = StageError::Lookup(LookupError::Unauthorized { service: "tmdb" });
        assert_eq!(lookup.severity(), Severity::AbortCycle);

        let locked = StageError::DatabaseLocked {
            attempts: 500,
            interval: Duration::from_secs(20),
        };
        assert_eq!(locked.severity(), Severity::AbortCycle);
        assert!(locked.to_string().contains("500"));

        let busy = StageError::Catalog(CatalogError::database(
            CatalogDbErrorKind::BusyOrLocked,
            "database is locked",
        ));
        assert_eq!(busy.severity(), Severity::AbortCycle);

        let constraint = StageError::Catalog(CatalogError::database(
            CatalogDbErrorKind::ConstraintViolation,
            "NOT NULL constraint failed",
        ));
        assert_eq!(constraint.severity(), Severity::Fatal);

        let files = StageError::Files(FileUpdateError::WorkerPanicked("boom".into()));
        assert_eq!(files.severity(), Severity::Fatal);
    }
}
