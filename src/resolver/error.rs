//! Error types for remote lookups.

use thiserror::Error;

/// A lookup that could not produce a definitive answer.
///
/// "No mapping exists" is not an error (see `LookupOutcome::NotFound`);
/// everything here is transient or a credential problem and aborts the
/// cycle instead of being cached.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The HTTP client could not be constructed.
    #[error("failed to build {service} HTTP client: {source}")]
    Client {
        /// Remote service name.
        service: &'static str,
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The request failed at the network level.
    #[error("cannot reach {service} API: {source}")]
    Network {
        /// Remote service name.
        service: &'static str,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The service rejected the configured credentials.
    #[error("{service} API rejected the configured credentials\n  Suggestion: check the API key")]
    Unauthorized {
        /// Remote service name.
        service: &'static str,
    },

    /// The service answered with an unexpected status.
    #[error("{service} API returned HTTP {status} for '{reference}'")]
    HttpStatus {
        /// Remote service name.
        service: &'static str,
        /// The HTTP status code.
        status: u16,
        /// The reference being looked up.
        reference: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected {service} API response: {message}")]
    InvalidResponse {
        /// Remote service name.
        service: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl LookupError {
    /// Name of the service that failed.
    #[must_use]
    pub fn service(&self) -> &'static str {
        match self {
            Self::Client { service, .. }
            | Self::Network { service, .. }
            | Self::Unauthorized { service }
            | Self::HttpStatus { service, .. }
            | Self::InvalidResponse { service, .. } => service,
        }
    }

    /// Builds an [`LookupError::InvalidResponse`].
    #[must_use]
    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }
}
