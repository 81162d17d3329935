//! Persisted resolution caches.
//!
//! A [`CacheStore`] maps an agent-local reference (for example `movie/603`)
//! to either a resolved [`ImdbId`] or a blacklist verdict meaning "the remote
//! service has no mapping". Blacklist entries carry an expiry and are treated
//! as absent once it has passed, so the reference gets looked up again.
//!
//! Stores are loaded once at startup and flushed after every successful cycle
//! and on shutdown. Only one cycle runs at a time, so the in-memory map is the
//! single writer between flushes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::guid::ImdbId;
use crate::persist::{self, PersistError};

/// Days a blacklist entry suppresses live lookups.
pub const BLACKLIST_EXPIRY_DAYS: i64 = 14;

/// TMDB cache file name inside the work directory.
pub const TMDB_CACHE_FILE: &str = "cache-tmdb2imdb.json";

/// TVDB cache file name inside the work directory.
pub const TVDB_CACHE_FILE: &str = "cache-tvdb2imdb.json";

/// Cached outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum CachedVerdict {
    /// The reference maps to this canonical identifier.
    Resolved {
        /// Canonical identifier.
        imdb_id: ImdbId,
    },
    /// The remote service reported that no mapping exists.
    Blacklisted,
}

/// One persisted cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// What the reference resolved to.
    pub verdict: CachedVerdict,
    /// When the entry was written.
    pub inserted_at: DateTime<Utc>,
    /// After this instant the entry is ignored and dropped on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A single persisted reference → verdict map.
#[derive(Debug)]
pub struct CacheStore {
    name: String,
    path: Option<PathBuf>,
    entries: DashMap<String, CacheEntry>,
    blacklist_ttl: Duration,
    dirty: AtomicBool,
}

impl CacheStore {
    /// Opens the store backed by `path`, loading existing entries.
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file is
    /// logged and replaced on the next flush; the cache only saves API calls.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(name: &str, path: &Path) -> Self {
        let entries: BTreeMap<String, CacheEntry> = match persist::read_json(path).await {
            Ok(Some(entries)) => entries,
            Ok(None) => BTreeMap::new(),
            Err(error) => {
                warn!(cache = name, %error, "Discarding unreadable cache file");
                BTreeMap::new()
            }
        };
        debug!(cache = name, entries = entries.len(), "Loaded cache");

        Self {
            name: name.to_string(),
            path: Some(path.to_path_buf()),
            entries: entries.into_iter().collect(),
            blacklist_ttl: Duration::days(BLACKLIST_EXPIRY_DAYS),
            dirty: AtomicBool::new(false),
        }
    }

    /// Creates a store that is never written to disk.
    #[must_use]
    pub fn in_memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            entries: DashMap::new(),
            blacklist_ttl: Duration::days(BLACKLIST_EXPIRY_DAYS),
            dirty: AtomicBool::new(false),
        }
    }

    /// Overrides the blacklist lifetime.
    #[must_use]
    pub fn with_blacklist_ttl(mut self, ttl: Duration) -> Self {
        self.blacklist_ttl = ttl;
        self
    }

    /// Store name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries, expired ones included until they are purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the live verdict for `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<CachedVerdict> {
        self.lookup_at(key, Utc::now())
    }

    /// Returns the live verdict for `key` as of `now`. Expired entries are removed.
    #[must_use]
    pub fn lookup_at(&self, key: &str, now: DateTime<Utc>) -> Option<CachedVerdict> {
        let live = {
            let entry = self.entries.get(key)?;
            (!entry.is_expired(now)).then(|| entry.verdict.clone())
        };
        if live.is_none()
            && self
                .entries
                .remove_if(key, |_, entry| entry.is_expired(now))
                .is_some()
        {
            debug!(cache = %self.name, key, "Blacklist entry expired");
            self.mark_dirty();
        }
        live
    }

    /// Records a successful resolution. Resolved entries never expire.
    pub fn insert_resolved(&self, key: &str, imdb_id: ImdbId) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                verdict: CachedVerdict::Resolved { imdb_id },
                inserted_at: Utc::now(),
                expires_at: None,
            },
        );
        self.mark_dirty();
    }

    /// Records that the remote service has no mapping for `key`.
    pub fn insert_blacklisted(&self, key: &str) {
        self.insert_blacklisted_at(key, Utc::now());
    }

    /// Records a blacklist entry as if written at `now`.
    pub fn insert_blacklisted_at(&self, key: &str, now: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                verdict: CachedVerdict::Blacklisted,
                inserted_at: now,
                expires_at: Some(now + self.blacklist_ttl),
            },
        );
        self.mark_dirty();
    }

    /// Drops every entry expired as of `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }

    /// Writes the store to disk if anything changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] when the snapshot cannot be written.
    pub async fn flush(&self) -> Result<(), PersistError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot: BTreeMap<String, CacheEntry> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        if let Err(error) = persist::write_json_atomic(path, &snapshot).await {
            self.mark_dirty();
            return Err(error);
        }
        debug!(cache = %self.name, entries = snapshot.len(), "Flushed cache");
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

/// The caches backing the two cache-and-lookup strategies.
#[derive(Debug, Clone)]
pub struct Caches {
    /// TMDB movie/series id → IMDb id.
    pub tmdb: Arc<CacheStore>,
    /// TVDB series id → IMDb id.
    pub tvdb: Arc<CacheStore>,
}

impl Caches {
    /// Loads both caches from `work_dir`.
    pub async fn open(work_dir: &Path) -> Self {
        Self {
            tmdb: Arc::new(CacheStore::open("tmdb", &work_dir.join(TMDB_CACHE_FILE)).await),
            tvdb: Arc::new(CacheStore::open("tvdb", &work_dir.join(TVDB_CACHE_FILE)).await),
        }
    }

    /// Caches that never touch the disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            tmdb: Arc::new(CacheStore::in_memory("tmdb")),
            tvdb: Arc::new(CacheStore::in_memory("tvdb")),
        }
    }

    fn all(&self) -> [&Arc<CacheStore>; 2] {
        [&self.tmdb, &self.tvdb]
    }

    /// Purges expired blacklist entries from every cache.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        for cache in self.all() {
            let removed = cache.purge_expired(now);
            if removed > 0 {
                info!(cache = cache.name(), removed, "Purged expired blacklist entries");
            }
        }
    }

    /// Flushes every cache, attempting all of them before reporting the first error.
    ///
    /// # Errors
    ///
    /// Returns the first [`PersistError`] encountered.
    pub async fn flush_all(&self) -> Result<(), PersistError> {
        let mut first_error = None;
        for cache in self.all() {
            if let Err(error) = cache.flush().await {
                warn!(cache = cache.name(), %error, "Failed to save cache");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
