//! Shared HTTP client construction for lookups and dataset downloads.
//!
//! Every outbound client gets the same timeouts, compression and
//! User-Agent so traffic from the tool is consistent and identifiable.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// User-Agent sent with every request.
#[must_use]
pub fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("ratings-sync/{version}")
}

/// Builds an HTTP client for the named component.
///
/// `name` is only used for logging.
///
/// # Errors
///
/// Returns the underlying [`reqwest::Error`] when the client cannot be built
/// (for example when the TLS backend fails to initialise).
pub fn build_http_client(name: &str) -> Result<Client, reqwest::Error> {
    debug!(client = name, "Building HTTP client");
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .user_agent(user_agent())
        .gzip(true)
        .build()
}

/// Builds a client for file downloads. No transparent decompression: the
/// bodies fetched with it are gzip files themselves.
///
/// # Errors
///
/// Returns the underlying [`reqwest::Error`] when the client cannot be built.
pub fn build_download_client(name: &str) -> Result<Client, reqwest::Error> {
    debug!(client = name, "Building download client");
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .user_agent(user_agent())
        .gzip(false)
        .build()
}
