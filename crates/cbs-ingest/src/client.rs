//! HTTP client for the CBS OData feeds

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::error::{IngestError, IngestResult};
use crate::feed::parse_records;
use crate::models::{EntityKind, FlatRecord};

/// Bounded retries with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// No retries, for callers that handle failure themselves
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): `base_delay * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// One page of a fact dataset
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Rows `offset..offset + limit` of `kind`, flattened. An empty vector
    /// means the offset is past the end.
    async fn fetch_page(&self, kind: EntityKind, offset: u64, limit: u64) -> IngestResult<Vec<FlatRecord>>;
}

pub struct CbsClient {
    http: reqwest::Client,
    feed: FeedConfig,
    retry: RetryPolicy,
}

impl CbsClient {
    pub fn new(feed: FeedConfig, retry: RetryPolicy) -> IngestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(feed.timeout())
            .user_agent(concat!("cbs-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, feed, retry })
    }

    pub fn page_url(&self, kind: EntityKind, offset: u64, limit: u64) -> String {
        format!("{}?$skip={offset}&$top={limit}", self.feed.collection_url(kind))
    }

    async fn get_once(&self, url: &str) -> IngestResult<Vec<u8>> {
        let request_error = |source| IngestError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.http.get(url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        Ok(body.to_vec())
    }

    /// GET `url`, retrying transport errors and non-success statuses
    pub async fn get_with_retry(&self, url: &str) -> IngestResult<Vec<u8>> {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            debug!(url, attempt, max_attempts, "GET");

            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        url,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) if e.is_retryable() => {
                    return Err(IngestError::RetriesExhausted {
                        url: url.to_string(),
                        attempts: max_attempts,
                        last_error: e.to_string(),
                    });
                },
                Err(e) => return Err(e),
            }
        }

        Err(IngestError::RetriesExhausted {
            url: url.to_string(),
            attempts: max_attempts,
            last_error: "no attempt was made".to_string(),
        })
    }

    /// Fetch a whole (small) collection in one request
    pub async fn fetch_collection(&self, kind: EntityKind) -> IngestResult<Vec<FlatRecord>> {
        let url = self.feed.collection_url(kind);
        let body = self.get_with_retry(&url).await?;
        parse_records(&body, kind)
    }
}

#[async_trait]
impl PageSource for CbsClient {
    async fn fetch_page(&self, kind: EntityKind, offset: u64, limit: u64) -> IngestResult<Vec<FlatRecord>> {
        let url = self.page_url(kind, offset, limit);
        let body = self.get_with_retry(&url).await?;
        parse_records(&body, kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_page_url() {
        let client = CbsClient::new(IngestConfig::default().feed, RetryPolicy::none()).unwrap();
        assert_eq!(
            client.page_url(EntityKind::Population, 20_000, 10_000),
            "https://opendata.cbs.nl/ODataFeed/odata/03759ned/TypedDataSet?$skip=20000&$top=10000"
        );
    }
}
