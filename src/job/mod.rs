//! Per-library units of work and their stage state machine.
//!
//! A [`Job`] walks the fixed sequence
//! `Created → Resolved → Accumulated → Transformed → DbUpdated → Completed`.
//! Which stage comes next never depends on data, only on whether the current
//! stage's handler succeeded. Non-terminal jobs are persisted in the
//! [`JobStore`] after every transition so an interrupted run resumes at its
//! last recorded stage.

mod store;

pub use store::{JOB_STATE_FILE, JobStore, StateError};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::model::Item;
use crate::model::Library;

/// Position of a job in the pipeline. Ordered by the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Fresh job; items not loaded yet.
    Created,
    /// Items carry canonical ids.
    Resolved,
    /// Items gathered for comparison.
    Accumulated,
    /// Items hold the values to be written.
    Transformed,
    /// Database rows written.
    DbUpdated,
    /// Files written; the job is done.
    Completed,
}

impl Stage {
    /// Every stage in order.
    pub const ALL: [Stage; 6] = [
        Stage::Created,
        Stage::Resolved,
        Stage::Accumulated,
        Stage::Transformed,
        Stage::DbUpdated,
        Stage::Completed,
    ];

    /// The stage reached after this stage's handler succeeds.
    /// `None` for the terminal stage.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Created => Some(Self::Resolved),
            Self::Resolved => Some(Self::Accumulated),
            Self::Accumulated => Some(Self::Transformed),
            Self::Transformed => Some(Self::DbUpdated),
            Self::DbUpdated => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// True for [`Stage::Completed`].
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Completed
    }

    /// Stable name used in logs and the state file.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Resolved => "RESOLVED",
            Self::Accumulated => "ACCUMULATED",
            Self::Transformed => "TRANSFORMED",
            Self::DbUpdated => "DB_UPDATED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One library being synchronised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The library this job covers. Its id is the job's identity.
    pub library: Library,
    /// Token of the run that created the job; names the missing-file report.
    pub run_id: Uuid,
    /// Current stage.
    pub stage: Stage,
    /// Items still pending at the current stage.
    #[serde(default)]
    pub items: Vec<Item>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A fresh job at [`Stage::Created`] with a new run token.
    #[must_use]
    pub fn new(library: Library) -> Self {
        Self {
            library,
            run_id: Uuid::new_v4(),
            stage: Stage::Created,
            items: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Library id, which identifies the job.
    #[must_use]
    pub fn key(&self) -> i64 {
        self.library.id
    }

    /// Moves to the next stage. Returns the new stage, or `None` if the job
    /// was already terminal.
    pub fn advance(&mut self) -> Option<Stage> {
        let next = self.stage.next()?;
        self.stage = next;
        Some(next)
    }
}
