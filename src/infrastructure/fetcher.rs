//! HTTP fetcher with a bounded concurrency gate and a per-id retry state
//! machine.
//!
//! Two fetch modes exist: `Normal` (first pass, higher concurrency,
//! exponential backoff) and `Careful` (re-fetching previously failed ids,
//! lower concurrency, linear backoff, small pacing delay). The modes also
//! disagree on 404 handling: normal mode treats 404 as "does not exist" and
//! gives up immediately, careful mode retries it within the attempt budget.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::domain::{HarvestError, ProductRecord};
use crate::infrastructure::config::{ApiConfig, CrawlConfig};

/// One fetch per id; `None` signals permanent failure for this run.
#[async_trait]
pub trait ProductFetcher: Send + Sync {
    async fn fetch(&self, id: &str) -> Option<ProductRecord>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Normal,
    Careful,
}

/// Retry/backoff/concurrency settings for one run.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub mode: FetchMode,
    pub max_attempts: u32,
    pub max_concurrent: usize,
    pub base_delay: Duration,
    pub pacing_delay: Duration,
}

impl FetchPolicy {
    pub fn from_config(mode: FetchMode, crawl: &CrawlConfig) -> Self {
        let mode_cfg = match mode {
            FetchMode::Normal => &crawl.normal,
            FetchMode::Careful => &crawl.careful,
        };
        Self {
            mode,
            max_attempts: crawl.max_attempts,
            max_concurrent: mode_cfg.max_concurrent.max(1),
            base_delay: Duration::from_millis(mode_cfg.base_delay_ms),
            pacing_delay: Duration::from_millis(mode_cfg.pacing_delay_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    ///
    /// Normal mode doubles the base delay per attempt; careful mode grows
    /// linearly with the attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        match self.mode {
            FetchMode::Normal => self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1)),
            FetchMode::Careful => self.base_delay * attempt,
        }
    }
}

/// Classification of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    RateLimited,
    ServerError(u16),
    NotFound,
    Network(String),
    /// Any other HTTP status; never retried.
    Terminal(u16),
    /// Malformed response body; never retried.
    Parse,
}

impl AttemptError {
    pub fn is_retryable(&self, mode: FetchMode) -> bool {
        match self {
            AttemptError::RateLimited
            | AttemptError::ServerError(_)
            | AttemptError::Network(_) => true,
            AttemptError::NotFound => mode == FetchMode::Careful,
            AttemptError::Terminal(_) | AttemptError::Parse => false,
        }
    }
}

/// Drives the attempt budget for one id, sleeping between retryable
/// failures. Factored out of [`HttpFetcher`] so the state machine can be
/// exercised without a live endpoint.
pub(crate) async fn fetch_with_retry<F, Fut>(
    policy: &FetchPolicy,
    id: &str,
    mut attempt_fn: F,
) -> Option<ProductRecord>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ProductRecord, AttemptError>>,
{
    for attempt in 1..=policy.max_attempts {
        if policy.pacing_delay > Duration::ZERO {
            sleep(policy.pacing_delay).await;
        }

        match attempt_fn(attempt).await {
            Ok(record) => {
                debug!("fetched id {} on attempt {}", id, attempt);
                return Some(record);
            }
            Err(err) => {
                if !err.is_retryable(policy.mode) {
                    match err {
                        AttemptError::NotFound => {
                            error!("❌ id {} does not exist (404)", id);
                        }
                        AttemptError::Parse => {
                            error!("PARSE ERROR for id {}", id);
                        }
                        AttemptError::Terminal(status) => {
                            error!("❌ HTTP {} for id {}, not retrying", status, id);
                        }
                        _ => unreachable!("retryable error classified as terminal"),
                    }
                    return None;
                }

                if attempt < policy.max_attempts {
                    let delay = policy.backoff(attempt);
                    match &err {
                        AttemptError::RateLimited => {
                            warn!("⚠️ RATE LIMIT (429) for id {}, waiting {:?}", id, delay);
                        }
                        AttemptError::ServerError(status) => {
                            warn!(
                                "SERVER ERROR {} for id {}, retry {}/{}",
                                status, id, attempt, policy.max_attempts
                            );
                        }
                        AttemptError::Network(reason) => {
                            warn!(
                                "NETWORK ERROR for id {}: {}, retry {}/{}",
                                id, reason, attempt, policy.max_attempts
                            );
                        }
                        AttemptError::NotFound => {
                            warn!("⚠️ id {} returned 404, retrying in {:?}", id, delay);
                        }
                        _ => {}
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    error!(
        "⛔ giving up on id {} after {} attempts",
        id, policy.max_attempts
    );
    None
}

/// Fetcher backed by a shared reqwest client and an admission semaphore.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    policy: FetchPolicy,
    gate: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(api: &ApiConfig, policy: FetchPolicy) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        if let Ok(referer) = HeaderValue::from_str(&api.referer) {
            headers.insert(REFERER, referer);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(api.request_timeout_secs))
            .user_agent(&api.user_agent)
            .default_headers(headers)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            gate: Arc::new(Semaphore::new(policy.max_concurrent)),
            policy,
        })
    }

    async fn attempt(&self, id: &str, url: &str) -> Result<ProductRecord, AttemptError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value =
                    response.json().await.map_err(|_| AttemptError::Parse)?;
                ProductRecord::from_response(id, &body).ok_or(AttemptError::Parse)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(AttemptError::RateLimited),
            StatusCode::NOT_FOUND => Err(AttemptError::NotFound),
            status if status.is_server_error() => Err(AttemptError::ServerError(status.as_u16())),
            status => Err(AttemptError::Terminal(status.as_u16())),
        }
    }
}

#[async_trait]
impl ProductFetcher for HttpFetcher {
    async fn fetch(&self, id: &str) -> Option<ProductRecord> {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.gate.acquire().await.ok()?;
        let url = format!("{}{}", self.base_url, id);
        fetch_with_retry(&self.policy, id, |_| self.attempt(id, &url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(mode: FetchMode) -> FetchPolicy {
        FetchPolicy {
            mode,
            max_attempts: 3,
            max_concurrent: 4,
            base_delay: Duration::from_millis(100),
            pacing_delay: Duration::ZERO,
        }
    }

    fn record(id: &str) -> ProductRecord {
        ProductRecord::from_response(id, &json!({ "id": id })).unwrap()
    }

    #[test]
    fn normal_backoff_is_exponential() {
        let p = policy(FetchMode::Normal);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn careful_backoff_is_linear() {
        let p = policy(FetchMode::Careful);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(300));
    }

    #[test]
    fn not_found_is_terminal_only_in_normal_mode() {
        assert!(!AttemptError::NotFound.is_retryable(FetchMode::Normal));
        assert!(AttemptError::NotFound.is_retryable(FetchMode::Careful));
    }

    #[test]
    fn parse_and_unexpected_statuses_are_never_retried() {
        for mode in [FetchMode::Normal, FetchMode::Careful] {
            assert!(!AttemptError::Parse.is_retryable(mode));
            assert!(!AttemptError::Terminal(403).is_retryable(mode));
        }
        assert!(AttemptError::RateLimited.is_retryable(FetchMode::Normal));
        assert!(AttemptError::ServerError(503).is_retryable(FetchMode::Careful));
        assert!(AttemptError::Network("timeout".into()).is_retryable(FetchMode::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_rate_limit_exhausts_exactly_three_attempts() {
        let attempts = AtomicU32::new(0);
        let result = fetch_with_retry(&policy(FetchMode::Normal), "9", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::RateLimited) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_server_error_recovers_on_later_attempt() {
        let attempts = AtomicU32::new(0);
        let result = fetch_with_retry(&policy(FetchMode::Normal), "9", |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(AttemptError::ServerError(502))
                } else {
                    Ok(record("9"))
                }
            }
        })
        .await;

        assert_eq!(result.unwrap().id, "9");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_mode_gives_up_on_404_without_retry() {
        let attempts = AtomicU32::new(0);
        let result = fetch_with_retry(&policy(FetchMode::Normal), "9", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::NotFound) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn careful_mode_retries_404_up_to_budget() {
        let attempts = AtomicU32::new(0);
        let result = fetch_with_retry(&policy(FetchMode::Careful), "9", |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(AttemptError::NotFound) }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
