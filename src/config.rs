//! Runtime configuration threaded into the batch driver and pipeline.
//!
//! [`SyncConfig`] is built once at startup from flags and environment
//! variables. Nothing here is global.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::catalog::LibraryFilter;
use crate::guid::Scheme;
use crate::job::JOB_STATE_FILE;
use crate::pipeline::MetadataRoots;

/// Catalog database location relative to the data directory.
pub const CATALOG_DB_RELATIVE: &str =
    "Plug-in Support/Databases/com.plexapp.plugins.library.db";

/// Default hours between cycles.
pub const DEFAULT_EVERY_HOURS: u64 = 12;

/// Longest accepted interval: one leap year.
pub const MAX_EVERY_HOURS: u64 = 24 * 366;

/// Configuration errors, reported before any cycle runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The data directory does not exist.
    #[error("media server data directory not found: {0}\n  Suggestion: set PLEX_DATA_DIR to the directory containing 'Plug-in Support'")]
    DataDirMissing(PathBuf),

    /// The catalog database is not where it should be.
    #[error("catalog database not found at {0}")]
    CatalogMissing(PathBuf),

    /// An unknown capability flag.
    #[error("unknown capability '{0}' (expected NO_MOVIE or NO_TV)")]
    UnknownCapability(String),

    /// An interval of zero or more than [`MAX_EVERY_HOURS`].
    #[error("cycle interval must be between 1 and {MAX_EVERY_HOURS} hours")]
    InvalidInterval,
}

/// Feature switches. `NoMovie`/`NoTv` come from the operator; `Tmdb`/`Tvdb`
/// are added when the matching credentials are present and verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Skip movie libraries.
    NoMovie,
    /// Skip series libraries.
    NoTv,
    /// TMDB lookups available.
    Tmdb,
    /// TVDB lookups available.
    Tvdb,
}

impl Capability {
    /// Name as written in `CAPABILITIES`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoMovie => "NO_MOVIE",
            Self::NoTv => "NO_TV",
            Self::Tmdb => "TMDB",
            Self::Tvdb => "TVDB",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ConfigError;

    /// Parses an operator flag. `TMDB`/`TVDB` are not accepted here.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO_MOVIE" => Ok(Self::NoMovie),
            "NO_TV" => Ok(Self::NoTv),
            _ => Err(ConfigError::UnknownCapability(s.trim().to_string())),
        }
    }
}

/// Parses a `;`-separated capability list. Empty entries are skipped.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownCapability`] for the first unknown flag.
pub fn parse_capabilities(value: &str) -> Result<BTreeSet<Capability>, ConfigError> {
    value
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Parses a `;`-separated list of library ids. Entries that are not
/// numbers are logged and skipped.
#[must_use]
pub fn parse_ignore_list(value: &str) -> BTreeSet<i64> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(entry = s, "Ignoring non-numeric library id");
                None
            }
        })
        .collect()
}

/// Extracts the API key from a legacy `user;userkey;apikey` string.
/// Returns `None` (with a warning) when the arity is wrong.
#[must_use]
pub fn parse_tvdb_auth_string(value: &str) -> Option<String> {
    let parts: Vec<&str> = value.split(';').map(str::trim).collect();
    match parts.as_slice() {
        [_, _, key] if !key.is_empty() => {
            warn!("TVDB_AUTH_STRING is deprecated; set TVDB_API_KEY instead");
            Some((*key).to_string())
        }
        _ => {
            warn!(
                parts = parts.len(),
                "TVDB_AUTH_STRING must have the form user;userkey;apikey; ignoring it"
            );
            None
        }
    }
}

/// Everything a cycle needs to know about its environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Media server data directory.
    pub data_dir: PathBuf,
    /// Directory for caches, job state, dataset copy and reports.
    pub work_dir: PathBuf,
    /// TMDB API key, if configured.
    pub tmdb_api_key: Option<String>,
    /// TVDB API key, if configured.
    pub tvdb_api_key: Option<String>,
    /// Library ids to skip.
    pub ignored_libraries: BTreeSet<i64>,
    /// Active capabilities.
    pub capabilities: BTreeSet<Capability>,
    /// Time between cycle starts.
    pub interval: Duration,
}

impl SyncConfig {
    /// Configuration with defaults for everything but the two directories.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            work_dir: work_dir.into(),
            tmdb_api_key: None,
            tvdb_api_key: None,
            ignored_libraries: BTreeSet::new(),
            capabilities: BTreeSet::new(),
            interval: Duration::from_secs(DEFAULT_EVERY_HOURS * 3600),
        }
    }

    /// Sets the interval in whole hours.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] for zero or anything above
    /// [`MAX_EVERY_HOURS`].
    pub fn with_every_hours(mut self, hours: u64) -> Result<Self, ConfigError> {
        if !(1..=MAX_EVERY_HOURS).contains(&hours) {
            return Err(ConfigError::InvalidInterval);
        }
        let secs = hours.checked_mul(3600).ok_or(ConfigError::InvalidInterval)?;
        self.interval = Duration::from_secs(secs);
        Ok(self)
    }

    /// Checks that the data directory and catalog exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the missing path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.data_dir.is_dir() {
            return Err(ConfigError::DataDirMissing(self.data_dir.clone()));
        }
        let catalog = self.catalog_path();
        if !catalog.is_file() {
            return Err(ConfigError::CatalogMissing(catalog));
        }
        Ok(())
    }

    /// Whether `capability` is active.
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Catalog database file.
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_DB_RELATIVE)
    }

    /// Metadata bundle roots.
    #[must_use]
    pub fn metadata_roots(&self) -> MetadataRoots {
        MetadataRoots::under(&self.data_dir)
    }

    /// Job snapshot file.
    #[must_use]
    pub fn job_state_path(&self) -> PathBuf {
        self.work_dir.join(JOB_STATE_FILE)
    }

    /// Which libraries cycles consider under the active capabilities.
    #[must_use]
    pub fn library_filter(&self) -> LibraryFilter {
        let mut schemes = BTreeSet::from([Scheme::Imdb]);
        if self.has(Capability::Tmdb) {
            schemes.insert(Scheme::Tmdb);
        }
        if self.has(Capability::Tvdb) {
            schemes.insert(Scheme::Tvdb);
        }
        LibraryFilter {
            movies: !self.has(Capability::NoMovie),
            series: !self.has(Capability::NoTv),
            schemes,
            ignored: self.ignored_libraries.clone(),
        }
    }
}
