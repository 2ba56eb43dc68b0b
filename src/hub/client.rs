//! Hub metadata requests with retry.
//!
//! Search pages and checksums are small text bodies fetched in full. They
//! use the same [`RetryPolicy`] as product downloads, so a flaky hub gets the
//! same number of attempts and the same backoff.

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::query::{ProductEntry, SearchQuery, build_search_url, extract_products, product_urls};
use crate::download::{
    AttemptOutcome, ChecksumAlgorithm, ChecksumParseError, DownloadError, ExpectedChecksum,
    HttpClient, NextAction, RetryPolicy,
};
use crate::shutdown::SharedShutdown;

/// Upper bound on search pages for one day, guarding against a hub that
/// keeps returning full pages.
const MAX_SEARCH_PAGES: u32 = 1000;

/// Errors from hub metadata requests.
#[derive(Debug, Error)]
pub enum HubError {
    /// The request URL could not be built.
    #[error(transparent)]
    Url(#[from] DownloadError),

    /// Every attempt failed.
    #[error("request to {url} failed: {reason}")]
    RequestFailed {
        /// The URL requested.
        url: String,
        /// Last failure, including the attempt count.
        reason: String,
    },

    /// Shutdown was requested while waiting to retry.
    #[error("request to {url} interrupted")]
    Interrupted {
        /// The URL requested.
        url: String,
    },

    /// The hub returned something that is not a digest.
    #[error("invalid checksum for product {id}: {source}")]
    InvalidChecksum {
        /// Product identifier.
        id: String,
        /// Why the digest was rejected.
        #[source]
        source: ChecksumParseError,
    },
}

/// Client for hub search and checksum endpoints.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: HttpClient,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl HubClient {
    /// Creates a hub client that retries per `policy`.
    #[must_use]
    pub fn new(http: HttpClient, policy: RetryPolicy) -> Self {
        Self {
            http,
            policy,
            shutdown: None,
        }
    }

    /// Abandons retry waits when `shutdown` is requested.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The underlying HTTP client, shared with the product downloader.
    #[must_use]
    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Fetches `url` as text, retrying HTTP and network failures.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RequestFailed`] once the policy gives up,
    /// [`HubError::Interrupted`] if shutdown cuts a retry wait short, or
    /// [`HubError::Url`] for a malformed URL.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get_text(&self, url: &str) -> Result<String, HubError> {
        let mut attempts = 1;
        loop {
            let error = match self.http.get_text(url).await {
                Ok(body) => return Ok(body),
                Err(e @ DownloadError::InvalidUrl { .. }) => return Err(HubError::Url(e)),
                Err(e) => e,
            };

            let outcome = AttemptOutcome::from(error);
            match self.policy.next_action(&outcome, attempts) {
                NextAction::Retry { delay, attempt } => {
                    warn!(
                        outcome = %outcome,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "hub request failed, will retry"
                    );
                    if !self.sleep_unless_shutdown(delay).await {
                        return Err(HubError::Interrupted {
                            url: url.to_string(),
                        });
                    }
                    attempts = attempt;
                }
                NextAction::RecordFailure { reason } => {
                    return Err(HubError::RequestFailed {
                        url: url.to_string(),
                        reason,
                    });
                }
                NextAction::Verify | NextAction::Commit => {
                    return Err(HubError::RequestFailed {
                        url: url.to_string(),
                        reason: format!("unexpected outcome: {outcome}"),
                    });
                }
            }
        }
    }

    /// Returns false if shutdown interrupted the wait.
    async fn sleep_unless_shutdown(&self, delay: std::time::Duration) -> bool {
        match &self.shutdown {
            None => {
                tokio::time::sleep(delay).await;
                true
            }
            Some(shutdown) => tokio::select! {
                () = tokio::time::sleep(delay) => true,
                () = shutdown.wait_for_shutdown() => false,
            },
        }
    }

    /// Fetches the published checksum of product `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RequestFailed`] if the hub cannot be reached and
    /// [`HubError::InvalidChecksum`] if the body is not a digest.
    pub async fn fetch_checksum(
        &self,
        hub: &str,
        id: &str,
        algorithm: ChecksumAlgorithm,
    ) -> Result<ExpectedChecksum, HubError> {
        let url = product_urls(hub, id).checksum;
        let body = self.get_text(&url).await?;
        let checksum =
            ExpectedChecksum::new(algorithm, &body).map_err(|source| HubError::InvalidChecksum {
                id: id.to_string(),
                source,
            })?;
        debug!(id, checksum = %checksum, "fetched checksum");
        Ok(checksum)
    }

    /// Lists every product sensed on `date`, paging until a short page.
    ///
    /// # Errors
    ///
    /// Returns the first page request that fails.
    #[instrument(skip(self, query), fields(date = %date, product = %query.product))]
    pub async fn search_day(
        &self,
        query: &SearchQuery,
        date: NaiveDate,
    ) -> Result<Vec<ProductEntry>, HubError> {
        let rows = query.rows.max(1);
        let mut products = Vec::new();

        for page in 0..MAX_SEARCH_PAGES {
            let url = build_search_url(query, date, page * rows)?;
            let body = self.get_text(&url).await?;
            let batch = extract_products(&body);
            let count = batch.len();
            debug!(page, count, "search page received");
            products.extend(batch);
            if count < rows as usize {
                break;
            }
        }

        products.sort_by(|a, b| a.title.cmp(&b.title));
        products.dedup_by(|a, b| a.id == b.id);
        info!(count = products.len(), "products found");
        Ok(products)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::download::BadChecksumPolicy;
    use crate::shutdown::ShutdownCoordinator;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, ResponseTemplate};

    fn client(num_tries: u32) -> HubClient {
        HubClient::new(
            HttpClient::new(None).unwrap(),
            RetryPolicy::immediate(num_tries, BadChecksumPolicy::Record),
        )
    }

    #[tokio::test]
    async fn test_get_text_retry_wait_stops_on_shutdown() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/busy"))
            .respond_with(ResponseTemplate::new(503).insert_header("Retry-After", "3600"))
            .mount(&mock_server)
            .await;

        let shutdown = ShutdownCoordinator::shared();
        shutdown.request_shutdown();
        let hub = client(3).with_shutdown(shutdown);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            hub.get_text(&format!("{}/busy", mock_server.uri())),
        )
        .await
        .expect("retry wait must not outlive shutdown");

        assert!(
            matches!(result, Err(HubError::Interrupted { ref url }) if url.ends_with("/busy")),
            "{result:?}"
        );
    }

    fn entry(id: &str, title: &str) -> String {
        format!("<entry><title>{title}</title><id>{id}</id></entry>")
    }

    #[tokio::test]
    async fn test_get_text_retries_then_succeeds() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock_server)
            .await;

        let body = client(3)
            .get_text(&format!("{}/flaky", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_get_text_gives_up_after_num_tries() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&mock_server)
            .await;

        let result = client(2).get_text(&mock_server.uri()).await;
        match result {
            Err(HubError::RequestFailed { reason, .. }) => {
                assert!(reason.contains("500"), "{reason}");
            }
            other => panic!("Expected RequestFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_checksum_normalises_case() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .and(path("/odata/v1/Products('abc')/Checksum/Value/$value"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("5D41402ABC4B2A76B9719D911017C592\n"),
            )
            .mount(&mock_server)
            .await;

        let checksum = client(1)
            .fetch_checksum(&mock_server.uri(), "abc", ChecksumAlgorithm::Md5)
            .await
            .unwrap();
        assert_eq!(checksum.hex(), "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn test_fetch_checksum_rejects_garbage() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        let result = client(1)
            .fetch_checksum(&mock_server.uri(), "abc", ChecksumAlgorithm::Md5)
            .await;
        assert!(matches!(result, Err(HubError::InvalidChecksum { .. })));
    }

    #[tokio::test]
    async fn test_search_day_follows_pages() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };

        let page0 = format!("<feed>{}{}</feed>", entry("id-2", "B"), entry("id-1", "A"));
        let page1 = format!("<feed>{}</feed>", entry("id-3", "C"));
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page0))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("start", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .mount(&mock_server)
            .await;

        let query = SearchQuery {
            hub: mock_server.uri(),
            product: "L2__NO2___".to_string(),
            platform: "Sentinel-5".to_string(),
            mode: "Offline".to_string(),
            rows: 2,
        };
        let date = NaiveDate::from_ymd_opt(2019, 1, 2).unwrap();

        let products = client(1).search_day(&query, date).await.unwrap();
        let ids: Vec<_> = products.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["id-1", "id-2", "id-3"]);
    }
}
