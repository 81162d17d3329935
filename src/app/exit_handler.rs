//! Exit code logic for a single `--once` cycle.
//!
//! Single responsibility: map how the cycle ended to the process exit outcome.

use ratings_sync::{CycleError, CycleOutcome};

use crate::ProcessExit;

/// Determines the process exit outcome of a one-shot cycle.
pub(crate) fn determine_exit_outcome(result: &Result<CycleOutcome, CycleError>) -> ProcessExit {
    match result {
        Ok(CycleOutcome::Completed { .. } | CycleOutcome::NoLibraries) => ProcessExit::Success,
        Ok(CycleOutcome::Aborted { .. }) => ProcessExit::Aborted,
        Err(_) => ProcessExit::Failure,
    }
}
