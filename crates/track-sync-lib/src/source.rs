//! Geometry source: the network boundary of the fetch coordinator
//!
//! [`GeometrySource`] is what the coordinator calls to load missing geometries.
//! With the `http` feature, [`HttpGeometrySource`] implements it against the
//! track server's REST API.

use crate::{TrackGeometry, TrackId};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Message used when a failed response carries no readable error detail
pub const DEFAULT_FETCH_ERROR_MESSAGE: &str = "Failed to fetch track geometries";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// The request was superseded. Not an error from the user's point of view.
    #[error("Request cancelled")]
    Cancelled,

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Loads full track geometries by identifier
#[async_trait]
pub trait GeometrySource: Send + Sync {
    /// Fetch geometries for exactly `ids`.
    ///
    /// Implementations should give up with [`FetchError::Cancelled`] once `cancel`
    /// fires; callers re-check the token after the await either way.
    async fn fetch_geometries(
        &self,
        ids: &[TrackId],
        cancel: &CancellationToken,
    ) -> Result<Vec<TrackGeometry>, FetchError>;
}

/// Extract a human-readable error message from a JSON error body.
///
/// Understands `{"detail": "..."}` as well as validation errors of the form
/// `{"detail": [{"msg": "..."}]}`.
pub fn error_message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => items
            .iter()
            .find_map(|item| item.get("msg")?.as_str().map(str::to_string)),
        _ => None,
    }
}

#[cfg(feature = "http")]
pub use http::{HttpGeometrySource, HttpSourceConfig};

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::Track;
    use std::time::Duration;

    /// Connection settings for [`HttpGeometrySource`]
    #[derive(Debug, Clone)]
    pub struct HttpSourceConfig {
        /// Server base URL, e.g. `https://tracks.example.com/api`
        pub base_url: String,
        pub map_id: u64,
        /// Bearer token sent with every request
        pub token: Option<String>,
        /// Per-request timeout enforced by the HTTP client
        pub timeout: Option<Duration>,
    }

    impl HttpSourceConfig {
        pub fn new(base_url: impl Into<String>, map_id: u64) -> Self {
            Self {
                base_url: base_url.into(),
                map_id,
                token: None,
                timeout: None,
            }
        }
    }

    #[derive(serde::Serialize)]
    struct GeometryRequest<'a> {
        track_ids: &'a [TrackId],
    }

    /// Geometry source backed by the track server's HTTP API
    pub struct HttpGeometrySource {
        client: reqwest::Client,
        config: HttpSourceConfig,
    }

    impl HttpGeometrySource {
        pub fn new(config: HttpSourceConfig) -> Result<Self, FetchError> {
            let mut builder = reqwest::Client::builder();
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }
            let client = builder
                .build()
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            Ok(Self { client, config })
        }

        fn map_url(&self, path: &str) -> String {
            format!(
                "{}/maps/{}/{}",
                self.config.base_url.trim_end_matches('/'),
                self.config.map_id,
                path
            )
        }

        fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            match &self.config.token {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        }

        async fn check_status(
            response: reqwest::Response,
            fallback: &str,
        ) -> Result<reqwest::Response, FetchError> {
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let body = response.text().await.unwrap_or_default();
            let message =
                error_message_from_body(&body).unwrap_or_else(|| fallback.to_string());
            Err(FetchError::Http {
                status: status.as_u16(),
                message,
            })
        }

        async fn post_geometries(&self, ids: &[TrackId]) -> Result<Vec<TrackGeometry>, FetchError> {
            let request = self
                .client
                .post(self.map_url("tracks/geometry"))
                .json(&GeometryRequest { track_ids: ids });

            let response = self
                .authorize(request)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let response = Self::check_status(response, DEFAULT_FETCH_ERROR_MESSAGE).await?;

            response
                .json::<Vec<TrackGeometry>>()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))
        }

        /// List the map's track metadata
        pub async fn list_tracks(&self) -> Result<Vec<Track>, FetchError> {
            let request = self.client.get(self.map_url("tracks"));
            let response = self
                .authorize(request)
                .send()
                .await
                .map_err(|e| FetchError::Transport(e.to_string()))?;
            let response = Self::check_status(response, "Failed to fetch tracks").await?;

            response
                .json::<Vec<Track>>()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))
        }
    }

    #[async_trait]
    impl GeometrySource for HttpGeometrySource {
        async fn fetch_geometries(
            &self,
            ids: &[TrackId],
            cancel: &CancellationToken,
        ) -> Result<Vec<TrackGeometry>, FetchError> {
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            tracing::debug!(count = ids.len(), "Requesting track geometries");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = self.post_geometries(ids) => result,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_map_url_joins_base() {
            let source =
                HttpGeometrySource::new(HttpSourceConfig::new("https://example.com/api/", 4))
                    .unwrap();
            assert_eq!(
                source.map_url("tracks/geometry"),
                "https://example.com/api/maps/4/tracks/geometry"
            );
        }

        #[tokio::test]
        async fn test_empty_request_skips_network() {
            // Unroutable base URL: any real request would fail
            let source =
                HttpGeometrySource::new(HttpSourceConfig::new("http://invalid.invalid", 1))
                    .unwrap();
            let result = source
                .fetch_geometries(&[], &CancellationToken::new())
                .await;
            assert_eq!(result, Ok(Vec::new()));
        }

        #[tokio::test]
        async fn test_cancelled_token_short_circuits() {
            let source =
                HttpGeometrySource::new(HttpSourceConfig::new("http://invalid.invalid", 1))
                    .unwrap();
            let cancel = CancellationToken::new();
            cancel.cancel();
            let result = source.fetch_geometries(&[1, 2], &cancel).await;
            assert_eq!(result, Err(FetchError::Cancelled));
        }
    }
}
