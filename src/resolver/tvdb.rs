//! TVDB lookup client (API v4).
//!
//! v4 requires a bearer token obtained by posting the API key to `/v4/login`.
//! The token is cached in the client and renewed once when a request comes
//! back `401`.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::guid::ImdbId;
use crate::http::build_http_client;
use crate::model::LibraryKind;

use super::{LookupClient, LookupError, LookupOutcome};

const SERVICE: &str = "tvdb";

/// Default TVDB API base URL.
const DEFAULT_BASE_URL: &str = "https://api4.thetvdb.com";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendedRecord {
    #[serde(default)]
    remote_ids: Vec<RemoteId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteId {
    id: String,
    #[serde(default)]
    source_name: String,
}

/// TVDB v4 API client.
pub struct TvdbClient {
    client: Client,
    base_url: String,
    api_key: String,
    token: Mutex<Option<String>>,
}

impl TvdbClient {
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
            token: Mutex::new(None),
        })
    }

    /// Logs in and keeps the token. Used at startup to fail fast on a bad key.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Unauthorized`] for a rejected key, or another
    /// [`LookupError`] if the service cannot be reached.
    pub async fn verify_credentials(&self) -> Result<(), LookupError> {
        let token = self.login().await?;
        *self.token.lock().await = Some(token);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn login(&self) -> Result<String, LookupError> {
        let url = format!("{}/v4/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "apikey": self.api_key }))
            .send()
            .await
            .map_err(|source| LookupError::Network { service: SERVICE, source })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(LookupError::Unauthorized { service: SERVICE }),
            s => {
                return Err(LookupError::HttpStatus {
                    service: SERVICE,
                    status: s.as_u16(),
                    reference: "login".to_string(),
                });
            }
        }

        let body: Envelope<LoginData> = response
            .json()
            .await
            .map_err(|e| LookupError::invalid_response(SERVICE, e.to_string()))?;
        let token = body
            .data
            .map(|d| d.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LookupError::invalid_response(SERVICE, "login returned no token"))?;

        debug!("Obtained TVDB token");
        Ok(token)
    }

    async fn current_token(&self) -> Result<String, LookupError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn fetch(&self, url: &str, token: &str) -> Result<Response, LookupError> {
        self.client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| {
                warn!(error = %source, "TVDB request failed");
                LookupError::Network { service: SERVICE, source }
            })
    }
}

impl std::fmt::Debug for TvdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TvdbClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn record_segment(kind: LibraryKind) -> &'static str {
    match kind {
        LibraryKind::Movie => "movies",
        LibraryKind::Series => "series",
    }
}

#[async_trait]
impl LookupClient for TvdbClient {
    fn name(&self) -> &str {
        SERVICE
    }

    #[instrument(skip(self), fields(client = SERVICE))]
    async fn lookup(&self, id: &str, kind: LibraryKind) -> Result<LookupOutcome, LookupError> {
        let segment = record_segment(kind);
        let reference = format!("{segment}/{id}");
        let url = format!(
            "{}/v4/{segment}/{}/extended?short=true",
            self.base_url,
            urlencoding::encode(id)
        );

        let token = self.current_token().await?;
        let mut response = self.fetch(&url, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!("TVDB token rejected; logging in again");
            let fresh = self.login().await?;
            *self.token.lock().await = Some(fresh.clone());
            response = self.fetch(&url, &fresh).await?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(%reference, "TVDB has no such entry");
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

        let body: Envelope<ExtendedRecord> = response
            .json()
            .await
            .map_err(|e| LookupError::invalid_response(SERVICE, e.to_string()))?;

        Ok(body
            .data
            .into_iter()
            .flat_map(|record| record.remote_ids)
            .filter(|remote| remote.source_name.eq_ignore_ascii_case("imdb"))
            .find_map(|remote| ImdbId::parse(&remote.id))
            .map_or(LookupOutcome::NotFound, LookupOutcome::Found))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn login_ok(token: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"status": "success", "data": {"token": token}}))
    }

    fn series_json(remote_ids: serde_json::Value) -> serde_json::Value {
        serde_json::json!({"status": "success", "data": {"id": 81189, "remoteIds": remote_ids}})
    }

    #[tokio::test]
    async fn test_lookup_series_found() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(login_ok("tok-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/series/81189/extended"))
            .and(query_param("short", "true"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(series_json(serde_json::json!([
                {"id": "5318", "type": 4, "sourceName": "TV.com"},
                {"id": "tt0903747", "type": 2, "sourceName": "IMDB"}
            ]))))
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("key", server.uri()).unwrap();
        for _ in 0..2 {
            let outcome = client.lookup("81189", LibraryKind::Series).await.unwrap();
            assert_eq!(
                outcome,
                LookupOutcome::Found(ImdbId::parse("tt0903747").unwrap())
            );
        }
    }

    #[tokio::test]
    async fn test_lookup_movie_uses_movies_record() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(login_ok("t"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/movies/190/extended"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"id": 190, "remoteIds": [{"id": "tt0133093", "sourceName": "IMDB"}]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("key", server.uri()).unwrap();
        let outcome = client.lookup("190", LibraryKind::Movie).await.unwrap();
        assert_eq!(
            outcome,
            LookupOutcome::Found(ImdbId::parse("tt0133093").unwrap())
        );
    }

    #[tokio::test]
    async fn test_lookup_without_imdb_remote_id_is_not_found() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(login_ok("t"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/series/1/extended"))
            .respond_with(ResponseTemplate::new(200).set_body_json(series_json(serde_json::json!([
                {"id": "99", "type": 4, "sourceName": "TV.com"}
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/series/2/extended"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("key", server.uri()).unwrap();
        for id in ["1", "2"] {
            assert_eq!(
                client.lookup(id, LibraryKind::Series).await.unwrap(),
                LookupOutcome::NotFound
            );
        }
    }

    #[tokio::test]
    async fn test_expired_token_triggers_single_relogin() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(login_ok("fresh"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/series/7/extended"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/series/7/extended"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(series_json(serde_json::json!([
                {"id": "tt0000007", "type": 2, "sourceName": "IMDB"}
            ]))))
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("key", server.uri()).unwrap();
        *client.token.lock().await = Some("stale".to_string());

        assert!(matches!(
            client.lookup("7", LibraryKind::Series).await.unwrap(),
            LookupOutcome::Found(_)
        ));
    }

    #[tokio::test]
    async fn test_verify_credentials_rejected() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("bad", server.uri()).unwrap();
        assert!(matches!(
            client.verify_credentials().await.unwrap_err(),
            LookupError::Unauthorized { .. }
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("POST"))
            .and(path("/v4/login"))
            .respond_with(login_ok("t"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = TvdbClient::with_base_url("key", server.uri()).unwrap();
        let err = client.lookup("81189", LibraryKind::Series).await.unwrap_err();
        assert!(matches!(err, LookupError::HttpStatus { status: 502, .. }));
    }
}
