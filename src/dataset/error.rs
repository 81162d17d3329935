//! Error types for dataset acquisition.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while acquiring or parsing the rating dataset.
///
/// Every variant aborts the current cycle; the next cycle tries again.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The HTTP client could not be constructed.
    #[error("failed to build dataset HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The download failed at the network level.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The dataset URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The dataset URL.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system failure on the local copy.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The decompressed stream could not be read.
    #[error("failed to read dataset: {0}")]
    Read(#[source] std::io::Error),

    /// No usable row was found.
    #[error("dataset contains no ratings")]
    Empty,

    /// The blocking parse task did not finish.
    #[error("dataset parse task failed: {0}")]
    Task(String),
}

impl DatasetError {
    pub(crate) fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_string(),
            source,
        }
    }
}
