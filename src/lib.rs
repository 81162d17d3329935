//! Ratings Sync Library
//!
//! Keeps the IMDb ratings stored in a media server's catalog up to date.
//! Each library is synchronised by a resumable job that walks a fixed
//! sequence of stages: resolve every item to an IMDb id, compare it against
//! the public ratings dataset, write changed ratings to the catalog database
//! (waiting out locks held by the media server) and finally rewrite the
//! per-item metadata files on a pool of workers.
//!
//! # Architecture
//!
//! - [`guid`] - Parsing of agent-tagged source references
//! - [`cache`] - Persisted resolution caches with blacklist expiry
//! - [`resolver`] - Per-scheme resolution strategies and lookup clients
//! - [`dataset`] - The IMDb ratings dataset and its acquisition
//! - [`catalog`] - SQLite catalog access and lock classification
//! - [`job`] - Jobs, the stage state machine and the job snapshot
//! - [`pipeline`] - Stage handlers, lock retry and the file phase
//! - [`runner`] - Drives a job to completion and classifies failures
//! - [`batch`] - One cycle over all eligible libraries
//! - [`config`] - Runtime configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod guid;
pub mod http;
pub mod job;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod resolver;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use batch::{BatchCycle, CycleError, CycleOutcome};
pub use cache::{CacheStore, CachedVerdict, Caches};
pub use catalog::{Catalog, CatalogError, LibraryFilter};
pub use config::{Capability, ConfigError, SyncConfig};
pub use dataset::{DatasetError, DatasetFetcher, Rating, RatingDataset, Score};
pub use guid::{ImdbId, Scheme, SourceReference};
pub use job::{Job, JobStore, Stage, StateError};
pub use model::{Item, Library, LibraryKind};
pub use pipeline::{LockRetryPolicy, MetadataRoots, Pipeline, Severity, StageError};
pub use resolver::{
    LookupClient, LookupError, LookupOutcome, Resolution, ResolutionStrategy, ResolverSet,
    TmdbClient, TvdbClient,
};
pub use runner::{JobFailure, JobOutcome, JobRunner};
