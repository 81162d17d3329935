//! TMDB lookup client - maps TMDB movie/show ids to IMDb ids via the
//! `external_ids` endpoint of the v3 API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::guid::ImdbId;
use crate::http::build_http_client;
use crate::model::LibraryKind;

use super::{LookupClient, LookupError, LookupOutcome};

const SERVICE: &str = "tmdb";

/// Default TMDB API base URL.
const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org";

#[derive(Debug, Deserialize)]
struct ExternalIds {
    imdb_id: Option<String>,
}

/// TMDB v3 API client.
pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    /// Creates a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Client`] if HTTP client construction fails.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LookupError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Client`] if HTTP client construction fails.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, LookupError> {
        let client = build_http_client(SERVICE)
            .map_err(|source| LookupError::Client { service: SERVICE, source })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Checks the API key with a cheap authenticated request.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Unauthorized`] for a rejected key, or another
    /// [`LookupError`] if the service cannot be reached.
    #[instrument(skip(self))]
    pub async fn verify_credentials(&self) -> Result<(), LookupError> {
        let url = format!(
            "{}/3/configuration?api_key={}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| LookupError::Network { service: SERVICE, source })?;

        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(LookupError::Unauthorized { service: SERVICE }),
            s => Err(LookupError::HttpStatus {
                service: SERVICE,
                status: s.as_u16(),
                reference: "configuration".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for TmdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmdbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn media_segment(kind: LibraryKind) -> &'static str {
    match kind {
        LibraryKind::Movie => "movie",
        LibraryKind::Series => "tv",
    }
}

#[async_trait]
impl LookupClient for TmdbClient {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self), fields(client = SERVICE))]
    async fn lookup(&self, id: &str, kind: LibraryKind) -> Result<LookupOutcome, LookupError> {
        let segment = media_segment(kind);
        let reference = format!("{segment}/{id}");
        let url = format!(
            "{}/3/{segment}/{}/external_ids?api_key={}",
            self.base_url,
            urlencoding::encode(id),
            urlencoding::encode(&self.api_key)
        );

        let response = self.client.get(&url).send().await.map_err(|source| {
            warn!(error = %source, "TMDB request failed");
            LookupError::Network { service: SERVICE, source }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%reference, "TMDB has no such entry");
            return Ok(LookupOutcome::NotFound);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(LookupError::Unauthorized { service: SERVICE });
        }
        if !status.is_success() {
            return Err(LookupError::HttpStatus {
                service: SERVICE,
                status: status.as_u16(),
                reference,
            });
        }

        let body: ExternalIds = response
            .json()
            .await
            .map_err(|e| LookupError::invalid_response(SERVICE, e.to_string()))?;

        Ok(body
            .imdb_id
            .as_deref()
            .and_then(ImdbId::parse)
            .map_or(LookupOutcome::NotFound, LookupOutcome::Found))
    }
}
