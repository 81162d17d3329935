//! IMDb rating dataset.
//!
//! The dataset is the public `title.ratings.tsv.gz` export:
//!
//! ```text
//! tconst      averageRating   numVotes
//! tt0000001   5.7             2104
//! ```
//!
//! [`RatingDataset`] is the read-only view used by the transform stage.
//! [`DatasetFetcher`] keeps a local copy in the work directory, refreshes it
//! when it gets stale and parses it on the blocking pool.

mod error;

pub use error::DatasetError;

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use crate::guid::ImdbId;

/// Public location of the ratings export.
pub const DEFAULT_DATASET_URL: &str = "https://datasets.imdbws.com/title.ratings.tsv.gz";

/// A local copy younger than this is reused instead of downloaded again.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

const LOCAL_FILE_NAME: &str = "title.ratings.tsv.gz";

/// A rating score with one decimal of precision, stored in tenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(u16);

impl Score {
    /// Highest representable score (10.0).
    pub const MAX: Score = Score(100);

    /// Builds a score from tenths (`73` is 7.3).
    #[must_use]
    pub fn from_tenths(tenths: u16) -> Option<Self> {
        (tenths <= Self::MAX.0).then_some(Self(tenths))
    }

    /// Rounds a floating point rating to one decimal.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || !(0.0..=10.0).contains(&value) {
            return None;
        }
        Self::from_tenths((value * 10.0).round() as u16)
    }

    /// Parses the dataset's decimal notation (`7.3`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<f64>().ok().and_then(Self::from_f64)
    }

    /// The score in tenths.
    #[must_use]
    pub fn tenths(self) -> u16 {
        self.0
    }

    /// The score as stored in the catalog.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 10.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

/// Current rating of one title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// Average user rating.
    pub score: Score,
    /// Number of votes behind the average.
    pub votes: u32,
}

/// Read-only canonical id → rating lookup, immutable for one cycle.
#[derive(Debug, Default, Clone)]
pub struct RatingDataset {
    ratings: HashMap<String, Rating>,
}

impl RatingDataset {
    /// Builds a dataset from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (ImdbId, Rating)>) -> Self {
        Self {
            ratings: entries
                .into_iter()
                .map(|(id, rating)| (String::from(id), rating))
                .collect(),
        }
    }

    /// Parses the TSV export from any reader. Malformed rows are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Read`] on IO failure and [`DatasetError::Empty`]
    /// if no row could be parsed.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut ratings = HashMap::new();
        let mut skipped = 0_usize;

        for line in BufReader::new(reader).lines() {
            let line = line.map_err(DatasetError::Read)?;
            if line.is_empty() || line.starts_with("tconst") {
                continue;
            }
            match parse_row(&line) {
                Some((id, rating)) => {
                    ratings.insert(id, rating);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            debug!(skipped, "Skipped malformed dataset rows");
        }
        if ratings.is_empty() {
            return Err(DatasetError::Empty);
        }
        Ok(Self { ratings })
    }

    /// Parses a gzip compressed export from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] if the file cannot be opened, decompressed or parsed.
    pub fn from_gzip_file(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(GzDecoder::new(file))
    }

    /// Current rating for `id`, if the title is rated.
    #[must_use]
    pub fn get(&self, id: &ImdbId) -> Option<Rating> {
        self.ratings.get(id.as_str()).copied()
    }

    /// Number of rated titles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    /// Returns true if the dataset holds no ratings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }
}

fn parse_row(line: &str) -> Option<(String, Rating)> {
    let mut fields = line.split('\t');
    let id = ImdbId::parse(fields.next()?)?;
    let score = Score::parse(fields.next()?)?;
    let votes = fields.next()?.trim().parse().ok()?;
    Some((id.into(), Rating { score, votes }))
}

/// Keeps a fresh local copy of the export and loads it.
#[derive(Debug, Clone)]
pub struct DatasetFetcher {
    client: Client,
    url: String,
    local_path: PathBuf,
    max_age: Duration,
}

impl DatasetFetcher {
    /// Fetcher for the public export, caching under `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Client`] if the HTTP client cannot be built.
    pub fn new(work_dir: &Path) -> Result<Self, DatasetError> {
        Self::with_url(work_dir, DEFAULT_DATASET_URL)
    }

    /// Fetcher for a custom URL (mirrors, tests).
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Client`] if the HTTP client cannot be built.
    pub fn with_url(work_dir: &Path, url: impl Into<String>) -> Result<Self, DatasetError> {
        let client = crate::http::build_download_client("dataset").map_err(DatasetError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
            local_path: work_dir.join(LOCAL_FILE_NAME),
            max_age: DEFAULT_MAX_AGE,
        })
    }

    /// Overrides how long a local copy stays fresh.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Path of the local copy.
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Returns the dataset, downloading a new copy first if the local one is stale.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError`] when the download or parsing fails.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn acquire(&self) -> Result<RatingDataset, DatasetError> {
        if self.is_fresh().await {
            debug!(path = %self.local_path.display(), "Reusing local dataset copy");
        } else {
            self.download().await?;
        }

        let path = self.local_path.clone();
        let dataset = tokio::task::spawn_blocking(move || RatingDataset::from_gzip_file(&path))
            .await
            .map_err(|e| DatasetError::Task(e.to_string()))??;

        info!(titles = dataset.len(), "Loaded IMDb rating dataset");
        Ok(dataset)
    }

    async fn is_fresh(&self) -> bool {
        let Ok(metadata) = tokio::fs::metadata(&self.local_path).await else {
            return false;
        };
        metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < self.max_age)
    }

    async fn download(&self) -> Result<(), DatasetError> {
        info!("Downloading IMDb rating dataset");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| DatasetError::network(&self.url, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        if let Some(parent) = self.local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DatasetError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.local_path.with_extension("gz.part");
        let written = match stream_to_file(response, &tmp, &self.url).await {
            Ok(written) => written,
            Err(error) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(error);
            }
        };

        tokio::fs::rename(&tmp, &self.local_path)
            .await
            .map_err(|source| DatasetError::Io {
                path: self.local_path.clone(),
                source,
            })?;

        if written == 0 {
            warn!("Dataset download was empty");
        }
        debug!(bytes = written, "Dataset downloaded");
        Ok(())
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    path: &Path,
    url: &str,
) -> Result<u64, DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = tokio::fs::File::create(path).await.map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DatasetError::network(url, source))?;
        writer.write_all(&chunk).await.map_err(io_err)?;
        written += chunk.len() as u64;
    }

    writer.flush().await.map_err(io_err)?;
    Ok(written)
}
