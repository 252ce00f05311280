//! Taostats transfer feed client.
//!
//! Fetches paged TAO transfer history for one address. Pagination walks
//! forward until the API returns an empty page or the page cap is hit, with
//! a short politeness delay between requests.
//!
//! Rate-limit aware: HTTP 429 is surfaced as its own error kind so callers
//! can fall back to stale data or back off, distinct from genuine upstream
//! failures.

use crate::tracker::TransferPage;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Hard cap on pages walked per fetch. Keeps one cycle to a bounded number
/// of upstream calls even for very busy addresses.
const MAX_PAGES: u32 = 5;

/// Delay between consecutive page requests.
const PAGE_DELAY: Duration = Duration::from_millis(500);

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    /// Upstream throttling (HTTP 429). Recoverable; callers may serve stale
    /// data or back off and retry.
    #[error("transfer feed rate limited")]
    RateLimited,
    /// Any other non-success response from the feed.
    #[error("transfer feed returned status {0}")]
    Status(StatusCode),
    /// Transport-level failure (connect, timeout, decode).
    #[error("transfer feed request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

/// The upstream transfer feed as the engine sees it. Concrete transports
/// (and test fakes) implement this.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<TransferPage>, FetchError>;
}

/// HTTP client for the Taostats transfer API.
pub struct TaostatsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    network: String,
    address: String,
    page_limit: u32,
}

impl TaostatsClient {
    pub fn new(
        base_url: String,
        api_key: String,
        network: String,
        address: String,
        page_limit: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url,
            api_key,
            network,
            address,
            page_limit,
        }
    }

    async fn fetch_page(&self, page: u32) -> Result<TransferPage, FetchError> {
        let url = format!("{}/transfer/v1", self.base_url);
        let limit = self.page_limit.to_string();
        let page_param = page.to_string();

        let resp = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .header("Authorization", &self.api_key)
            .query(&[
                ("network", self.network.as_str()),
                ("address", self.address.as_str()),
                ("limit", limit.as_str()),
                ("page", page_param.as_str()),
            ])
            .send()
            .await?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            status if !status.is_success() => Err(FetchError::Status(status)),
            _ => Ok(resp.json::<TransferPage>().await?),
        }
    }
}

#[async_trait]
impl TransferSource for TaostatsClient {
    /// Walk the feed page by page until an empty page or the page cap.
    async fn fetch_all(&self) -> Result<Vec<TransferPage>, FetchError> {
        let mut pages = Vec::new();

        for page_number in 1..=MAX_PAGES {
            let page = match self.fetch_page(page_number).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(page = page_number, error = %e, "transfer page fetch failed");
                    return Err(e);
                }
            };

            if page.data.is_empty() {
                break;
            }

            debug!(
                page = page_number,
                records = page.data.len(),
                "fetched transfer page"
            );
            pages.push(page);

            if page_number < MAX_PAGES {
                tokio::time::sleep(PAGE_DELAY).await;
            }
        }

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_body(records: usize) -> serde_json::Value {
        let data: Vec<_> = (0..records)
            .map(|i| {
                serde_json::json!({
                    "extrinsic_id": format!("100-{i}"),
                    "from": {"ss58": "5From"},
                    "to": {"ss58": "5To"},
                    "amount": "1000000000",
                })
            })
            .collect();
        serde_json::json!({"data": data})
    }

    fn client(server: &MockServer) -> TaostatsClient {
        TaostatsClient::new(
            server.uri(),
            "test-key".to_string(),
            "finney".to_string(),
            "5To".to_string(),
            200,
        )
    }

    #[tokio::test]
    async fn pagination_stops_on_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/transfer/v1"))
            .and(header("Authorization", "test-key"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transfer/v1"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(0)))
            .mount(&server)
            .await;

        let pages = client(&server).fetch_all().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].data.len(), 2);
    }

    #[tokio::test]
    async fn too_many_requests_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transfer/v1"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).fetch_all().await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transfer/v1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).fetch_all().await.unwrap_err();
        assert!(matches!(err, FetchError::Status(status) if status.as_u16() == 500));
    }
}
