//! Rate-limited fetcher
//!
//! Every upstream read goes through [`RateLimitedFetcher`]. A request is
//! attempted up to `max_attempts` times: 429 responses honor `Retry-After`
//! (falling back to exponential backoff), 5xx responses and transport errors
//! back off exponentially, and any other non-success status fails at once.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, RETRY_AFTER};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchPolicyConfig;
use crate::upstream::resources::{Resource, next_link, parse_resources};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("upstream still failing after {attempts} attempts for {url}: {last_error}")]
    UpstreamExhausted {
        attempts: u32,
        url: String,
        last_error: String,
    },
    #[error("invalid upstream url '{0}'")]
    InvalidUrl(String),
    #[error("invalid upstream response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl FetchError {
    /// HTTP status carried by the error, if the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Retry and pacing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Ceiling for a server-provided `Retry-After` hint.
    pub max_retry_after: Duration,
    pub page_delay: Duration,
    pub max_pages: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::from(&FetchPolicyConfig::default())
    }
}

impl From<&FetchPolicyConfig> for FetchPolicy {
    fn from(config: &FetchPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_retry_after: Duration::from_secs(config.max_retry_after_seconds),
            page_delay: Duration::from_millis(config.page_delay_ms),
            max_pages: config.max_pages,
        }
    }
}

impl FetchPolicy {
    /// Backoff before retrying after the given (1-based) failed attempt:
    /// `base * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let factor = 1u32 << exponent;
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Wait before retrying a 429: the `Retry-After` hint clamped to
    /// `max_retry_after`, or the regular backoff when there is no usable hint.
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        match retry_after {
            Some(hint) if hint > self.max_retry_after => {
                warn!(
                    retry_after_secs = hint.as_secs(),
                    max_retry_after_secs = self.max_retry_after.as_secs(),
                    "Retry-After hint exceeds the allowed ceiling, clamping"
                );
                self.max_retry_after
            }
            Some(hint) => hint,
            None => self.backoff_for_attempt(attempt),
        }
    }
}

/// Result of a paginated listing.
///
/// `complete` is false when a page failed (see `error`) or when `max_pages`
/// was reached while a next link remained.
#[derive(Debug, Default)]
pub struct PagedDocuments {
    pub data: Vec<Resource>,
    pub included: Vec<Resource>,
    pub pages: u32,
    pub complete: bool,
    pub error: Option<FetchError>,
}

enum Attempt {
    Done(Value),
    Retry { wait: Duration, reason: String },
}

#[derive(Debug, Clone)]
pub struct RateLimitedFetcher {
    http: reqwest::Client,
    base_url: Url,
    policy: FetchPolicy,
}

impl RateLimitedFetcher {
    pub fn new(http: reqwest::Client, api_base: &str, policy: FetchPolicy) -> Result<Self, FetchError> {
        let base_url =
            Url::parse(api_base).map_err(|_| FetchError::InvalidUrl(api_base.to_string()))?;
        Ok(Self {
            http,
            base_url,
            policy,
        })
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    fn resolve(&self, path: &str) -> Result<Url, FetchError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|_| FetchError::InvalidUrl(path.to_string()));
        }
        self.base_url
            .join(path)
            .map_err(|_| FetchError::InvalidUrl(path.to_string()))
    }

    /// Fetch one JSON document, retrying per the policy.
    pub async fn fetch_one(&self, token: &str, path: &str) -> Result<Value, FetchError> {
        let url = self.resolve(path)?;
        let started = Instant::now();
        let mut last_error = String::new();

        for attempt in 1..=self.policy.max_attempts {
            counter!("plansync_fetch_requests_total").increment(1);

            match self.attempt(token, &url, attempt).await? {
                Attempt::Done(document) => {
                    histogram!("plansync_fetch_latency_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                    return Ok(document);
                }
                Attempt::Retry { wait, reason } => {
                    last_error = reason;
                    if attempt == self.policy.max_attempts {
                        break;
                    }
                    counter!("plansync_fetch_retries_total").increment(1);
                    warn!(
                        url = %url,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        reason = %last_error,
                        "Upstream request failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        counter!("plansync_fetch_exhausted_total").increment(1);
        Err(FetchError::UpstreamExhausted {
            attempts: self.policy.max_attempts,
            url: url.to_string(),
            last_error,
        })
    }

    async fn attempt(&self, token: &str, url: &Url, attempt: u32) -> Result<Attempt, FetchError> {
        let response = match self
            .http
            .get(url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Retry {
                    wait: self.policy.backoff_for_attempt(attempt),
                    reason: format!("network error: {e}"),
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map(Attempt::Done)
                .map_err(|e| FetchError::Decode {
                    url: url.to_string(),
                    message: e.to_string(),
                });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let hint = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let wait = self.policy.rate_limit_wait(hint, attempt);
            return Ok(Attempt::Retry {
                wait,
                reason: "rate limited (429)".to_string(),
            });
        }

        if status.is_server_error() {
            return Ok(Attempt::Retry {
                wait: self.policy.backoff_for_attempt(attempt),
                reason: format!("server error ({})", status.as_u16()),
            });
        }

        Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }

    /// Follow `links.next` until exhausted or `max_pages` pages were read.
    ///
    /// Never fails: a page error truncates the listing and is reported on the
    /// returned value.
    pub async fn fetch_all_pages(&self, token: &str, base_path: &str, max_pages: u32) -> PagedDocuments {
        let mut result = PagedDocuments::default();
        let mut next = Some(base_path.to_string());

        while let Some(path) = next.take() {
            if result.pages >= max_pages {
                debug!(path = %base_path, max_pages, "Page limit reached with pages remaining");
                return result;
            }
            if result.pages > 0 && !self.policy.page_delay.is_zero() {
                tokio::time::sleep(self.policy.page_delay).await;
            }

            match self.fetch_one(token, &path).await {
                Ok(document) => {
                    result.pages += 1;
                    result.data.extend(parse_resources(document.get("data")));
                    result.included.extend(parse_resources(document.get("included")));
                    next = next_link(&document);
                }
                Err(e) => {
                    warn!(path = %path, pages = result.pages, error = %e, "Listing truncated by fetch failure");
                    counter!("plansync_fetch_truncated_total").increment(1);
                    result.error = Some(e);
                    return result;
                }
            }
        }

        result.complete = true;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_schedule() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for_attempt(3), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_millis(8_000));
        assert_eq!(policy.backoff_for_attempt(6), Duration::from_secs(10));
        assert_eq!(policy.backoff_for_attempt(40), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_hint_is_clamped() {
        let policy = FetchPolicy::default();
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(2)), 1),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.rate_limit_wait(Some(Duration::from_secs(3_600)), 1),
            Duration::from_secs(60)
        );
        assert_eq!(policy.rate_limit_wait(None, 2), Duration::from_millis(1_000));
    }

    #[test]
    fn test_relative_and_absolute_paths_resolve() {
        let fetcher = RateLimitedFetcher::new(
            reqwest::Client::new(),
            "https://api.example.test",
            FetchPolicy::default(),
        )
        .unwrap();

        assert_eq!(
            fetcher.resolve("/services/v2/service_types").unwrap().as_str(),
            "https://api.example.test/services/v2/service_types"
        );
        assert_eq!(
            fetcher
                .resolve("https://api.example.test/services/v2/plans?offset=25")
                .unwrap()
                .as_str(),
            "https://api.example.test/services/v2/plans?offset=25"
        );
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        assert!(matches!(
            RateLimitedFetcher::new(reqwest::Client::new(), "not a url", FetchPolicy::default()),
            Err(FetchError::InvalidUrl(_))
        ));
    }
}
