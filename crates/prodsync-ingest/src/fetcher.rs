//! Rate-limited HTTP fetcher
//!
//! Issues one GET per call and masks transient failure behind a bounded
//! retry budget. Each attempt is classified into an [`AttemptOutcome`] and the
//! retry loop acts on that value:
//!
//! - `429 Too Many Requests`: wait `Retry-After` (or the fallback) and retry
//! - `5xx` or a transport error: exponential backoff (1s, 2s, 4s, ...) and retry
//! - anything else: returned to the caller as-is
//!
//! 429s draw from the same budget as other failures. When the budget runs
//! out, [`RateLimitedFetcher::fetch`] returns `None` instead of an error.

use chrono::{DateTime, Utc};
use prodsync_common::BackoffPolicy;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::config::{IngestConfig, SourceConfig};
use crate::error::Result;

/// A response the fetcher did not consume: any status other than 429/5xx.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Classification of one HTTP attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Final response handed back to the caller
    Success(FetchResponse),
    /// 429; wait this long before the next attempt
    RateLimited { wait: Duration },
    /// Network failure or 5xx; back off and try again
    Retryable(String),
    /// The request cannot succeed, e.g. it could not be built
    Fatal(String),
}

pub struct RateLimitedFetcher {
    client: Client,
    base_url: String,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
    rate_limit_fallback: Duration,
}

impl RateLimitedFetcher {
    /// Create a fetcher for one source.
    pub fn new(source: &SourceConfig, config: &IngestConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        source.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("prodsync-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: source.base_url.trim_end_matches('/').to_string(),
            clock,
            backoff: BackoffPolicy::default(),
            rate_limit_fallback: config.rate_limit_fallback(),
        })
    }

    /// Replace the default 1s doubling backoff.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for a path relative to the source base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` with `query`, making at most `max_retries + 1` attempts.
    ///
    /// Returns `None` when every attempt failed transiently or the request
    /// could not be built.
    pub async fn fetch(
        &self,
        path: &str,
        query: &[(&str, String)],
        max_retries: u32,
    ) -> Option<FetchResponse> {
        let url = self.url_for(path);
        let mut attempt: u32 = 0;

        while attempt <= max_retries {
            attempt += 1;
            let attempts_left = attempt <= max_retries;

            match self.attempt_once(&url, query).await {
                AttemptOutcome::Success(response) => {
                    debug!(url = %url, attempt, status = %response.status, "Fetch succeeded");
                    return Some(response);
                },
                AttemptOutcome::RateLimited { wait } => {
                    warn!(
                        url = %url,
                        attempt,
                        max_attempts = max_retries + 1,
                        wait_secs = wait.as_secs_f64(),
                        "Rate limited by remote source"
                    );
                    if attempts_left {
                        self.clock.sleep(wait).await;
                    }
                },
                AttemptOutcome::Retryable(reason) => {
                    warn!(
                        url = %url,
                        attempt,
                        max_attempts = max_retries + 1,
                        reason = %reason,
                        "Transient fetch failure"
                    );
                    if attempts_left {
                        let delay = self.backoff.delay_for_retry(attempt);
                        debug!(delay_secs = delay.as_secs_f64(), "Backing off before retry");
                        self.clock.sleep(delay).await;
                    }
                },
                AttemptOutcome::Fatal(reason) => {
                    error!(url = %url, reason = %reason, "Request cannot be sent");
                    return None;
                },
            }
        }

        warn!(url = %url, attempts = attempt, "Retry budget exhausted");
        None
    }

    /// Issue one timed GET and classify the result.
    pub async fn attempt_once(&self, url: &str, query: &[(&str, String)]) -> AttemptOutcome {
        let request = match self.client.get(url).query(query).build() {
            Ok(request) => request,
            Err(e) => return AttemptOutcome::Fatal(e.to_string()),
        };

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return AttemptOutcome::Fatal(e.to_string()),
            Err(e) => return AttemptOutcome::Retryable(describe_transport_error(&e)),
        };

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(response.headers(), Utc::now()).unwrap_or(self.rate_limit_fallback);
            return AttemptOutcome::RateLimited { wait };
        }

        if status.is_server_error() {
            return AttemptOutcome::Retryable(format!("server error: {status}"));
        }

        let headers = response.headers().clone();
        match response.bytes().await {
            Ok(body) => AttemptOutcome::Success(FetchResponse {
                status,
                headers,
                body: body.to_vec(),
            }),
            Err(e) => AttemptOutcome::Retryable(describe_transport_error(&e)),
        }
    }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timeout: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// Wait requested by a `Retry-After` header: delta-seconds (fractions
/// accepted) or an HTTP date. Dates in the past mean "now".
pub fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    // Values too large for a Duration fall back like any unusable header
    if let Ok(secs) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
