//! Resolution of source references into canonical IMDb identifiers.
//!
//! # Architecture
//!
//! - [`LookupClient`] - async seam over a remote "agent id → IMDb id" service
//! - [`ResolutionStrategy`] - closed set of per-scheme strategies
//! - [`ResolverSet`] - picks the strategy for an item by its parsed [`Scheme`]
//! - [`TmdbClient`] / [`TvdbClient`] - HTTP lookup clients
//!
//! A strategy either sets the item's canonical id and returns
//! [`Resolution::Resolved`], or returns [`Resolution::Unresolved`] and the
//! item is dropped from the job. Transient lookup failures surface as
//! [`LookupError`] and are never cached.

mod error;
mod tmdb;
mod tvdb;

pub use error::LookupError;
pub use tmdb::TmdbClient;
pub use tvdb::TvdbClient;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::cache::{CacheStore, CachedVerdict, Caches};
use crate::guid::{ImdbId, Scheme, SourceReference};
use crate::model::{Item, LibraryKind};

/// Definitive answer of a remote lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The service maps the reference to this IMDb id.
    Found(ImdbId),
    /// The service has no IMDb id for the reference.
    NotFound,
}

/// Remote "agent id → IMDb id" lookup.
///
/// Uses `async_trait` so strategies can hold `Arc<dyn LookupClient>`; test
/// doubles plug in at the same seam as the HTTP clients.
#[async_trait]
pub trait LookupClient: Send + Sync + fmt::Debug {
    /// Service name for logs (`"tmdb"`, `"tvdb"`).
    fn name(&self) -> &str;

    /// Looks up the IMDb id of agent-local `id` for an item of `kind`.
    async fn lookup(&self, id: &str, kind: LibraryKind) -> Result<LookupOutcome, LookupError>;
}

/// Outcome of resolving one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The item's canonical id is set.
    Resolved,
    /// The item cannot be resolved and should be dropped.
    Unresolved,
}

/// Cache key of an agent-local id. Movies and series ids overlap on TMDB.
#[must_use]
pub fn cache_key(kind: LibraryKind, id: &str) -> String {
    match kind {
        LibraryKind::Movie => format!("movie/{id}"),
        LibraryKind::Series => format!("tv/{id}"),
    }
}

/// Cache first, remote lookup on miss.
#[derive(Debug, Clone)]
pub struct CachedLookup {
    cache: Arc<CacheStore>,
    client: Arc<dyn LookupClient>,
}

impl CachedLookup {
    /// Combines a cache with the client that fills it.
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, client: Arc<dyn LookupClient>) -> Self {
        Self { cache, client }
    }

    #[instrument(skip(self, item), fields(client = self.client.name(), item = item.id))]
    async fn resolve(
        &self,
        item: &mut Item,
        id: &str,
        kind: LibraryKind,
    ) -> Result<Resolution, LookupError> {
        let key = cache_key(kind, id);

        match self.cache.lookup(&key) {
            Some(CachedVerdict::Resolved { imdb_id }) => {
                item.imdb_id = Some(imdb_id);
                return Ok(Resolution::Resolved);
            }
            Some(CachedVerdict::Blacklisted) => {
                debug!(%key, "Reference is blacklisted");
                return Ok(Resolution::Unresolved);
            }
            None => {}
        }

        match self.client.lookup(id, kind).await? {
            LookupOutcome::Found(imdb_id) => {
                debug!(%key, %imdb_id, "Resolved via lookup");
                self.cache.insert_resolved(&key, imdb_id.clone());
                item.imdb_id = Some(imdb_id);
                Ok(Resolution::Resolved)
            }
            LookupOutcome::NotFound => {
                debug!(%key, "No IMDb mapping; blacklisting");
                self.cache.insert_blacklisted(&key);
                Ok(Resolution::Unresolved)
            }
        }
    }
}

/// How items of one scheme are resolved.
#[derive(Debug, Clone)]
pub enum ResolutionStrategy {
    /// The reference already is an IMDb id.
    Identity,
    /// Cache-backed remote lookup.
    CachedLookup(CachedLookup),
    /// No credentials configured; every item is unresolved without a lookup.
    Disabled,
}

impl ResolutionStrategy {
    /// Resolves `item`, whose parsed reference is `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when a remote lookup fails transiently.
    pub async fn resolve(
        &self,
        item: &mut Item,
        reference: &SourceReference,
        kind: LibraryKind,
    ) -> Result<Resolution, LookupError> {
        match self {
            Self::Identity => Ok(match ImdbId::parse(&reference.id) {
                Some(imdb_id) => {
                    item.imdb_id = Some(imdb_id);
                    Resolution::Resolved
                }
                None => Resolution::Unresolved,
            }),
            Self::CachedLookup(lookup) => lookup.resolve(item, &reference.id, kind).await,
            Self::Disabled => Ok(Resolution::Unresolved),
        }
    }
}

/// The strategy for every known scheme.
#[derive(Debug, Clone)]
pub struct ResolverSet {
    imdb: ResolutionStrategy,
    tmdb: ResolutionStrategy,
    tvdb: ResolutionStrategy,
}

impl ResolverSet {
    /// Builds the set. A scheme without a client gets [`ResolutionStrategy::Disabled`].
    #[must_use]
    pub fn new(
        caches: &Caches,
        tmdb: Option<Arc<dyn LookupClient>>,
        tvdb: Option<Arc<dyn LookupClient>>,
    ) -> Self {
        let cached = |cache: &Arc<CacheStore>, client: Option<Arc<dyn LookupClient>>| {
            client.map_or(ResolutionStrategy::Disabled, |client| {
                ResolutionStrategy::CachedLookup(CachedLookup::new(Arc::clone(cache), client))
            })
        };

        Self {
            imdb: ResolutionStrategy::Identity,
            tmdb: cached(&caches.tmdb, tmdb),
            tvdb: cached(&caches.tvdb, tvdb),
        }
    }

    /// Strategy registered for `scheme`.
    #[must_use]
    pub fn strategy_for(&self, scheme: Scheme) -> &ResolutionStrategy {
        match scheme {
            Scheme::Imdb => &self.imdb,
            Scheme::Tmdb => &self.tmdb,
            Scheme::Tvdb => &self.tvdb,
        }
    }

    /// Resolves one item. Items whose GUID matches no known scheme are unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when a remote lookup fails transiently.
    pub async fn resolve(
        &self,
        item: &mut Item,
        kind: LibraryKind,
    ) -> Result<Resolution, LookupError> {
        let Some(reference) = item.source_reference() else {
            debug!(item = item.id, guid = %item.guid, "Unknown agent");
            return Ok(Resolution::Unresolved);
        };
        self.strategy_for(reference.scheme)
            .resolve(item, &reference, kind)
            .await
    }
}
