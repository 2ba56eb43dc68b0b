//! HTTP client wrapper for talking to the hub.
//!
//! [`HttpClient`] owns a pooled `reqwest::Client` with hub-friendly timeouts
//! and attaches the configured basic-auth credentials to every request.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::retry::parse_retry_after;
use crate::user_agent;

/// Hub account credentials, sent as HTTP basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates credentials from a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The account name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP client for hub requests with streaming support.
///
/// Created once per run and shared by reference, taking advantage of
/// connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    credentials: Option<Credentials>,
}

impl HttpClient {
    /// Creates a client with default timeouts (30s connect, 5min read).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be initialised.
    pub fn new(credentials: Option<Credentials>) -> Result<Self, reqwest::Error> {
        Self::with_timeouts(credentials, CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error if the TLS backend cannot be initialised.
    #[instrument(level = "debug", skip(credentials))]
    pub fn with_timeouts(
        credentials: Option<Credentials>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Sends a GET request and returns the response once headers arrive.
    ///
    /// The body is left unread so callers can stream it.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns a non-2xx status
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = request.send().await.map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(status = status.as_u16(), ?retry_after, "request rejected");
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Sends a GET request and reads the whole body as text.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`get`](Self::get), plus a network error if
    /// the body cannot be read.
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        let response = self.get(url).await?;
        response.text().await.map_err(|e| map_reqwest_error(url, e))
    }

    /// Returns true when credentials will be attached to requests.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Maps a reqwest error to a timeout or network error.
pub(crate) fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials::new("s5pguest", "hunter2");
        let text = format!("{credentials:?}");
        assert!(text.contains("s5pguest"));
        assert!(!text.contains("hunter2"), "password leaked: {text}");
    }

    #[tokio::test]
    async fn test_get_rejects_invalid_url() {
        let client = HttpClient::new(None).unwrap();
        let result = client.get("not-a-url").await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_get_attaches_basic_auth() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        // base64("user:pass") == "dXNlcjpwYXNz"
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new(Some(Credentials::new("user", "pass"))).unwrap();
        let body = client
            .get_text(&format!("{}/search", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_get_sends_user_agent() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/ua"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new(None).unwrap();
        assert!(client.get(&format!("{}/ua", mock_server.uri())).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_maps_error_status_with_retry_after() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new(None).unwrap();
        match client.get(&format!("{}/busy", mock_server.uri())).await {
            Err(DownloadError::HttpStatus {
                status,
                retry_after,
                ..
            }) => {
                assert_eq!(status, 429);
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_maps_unauthorized_to_http_status() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client = HttpClient::new(Some(Credentials::new("u", "wrong"))).unwrap();
        let result = client.get(&mock_server.uri()).await;
        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 401, .. })
        ));
    }
}
