//! Concurrent HTTP fetch engine with retry and backoff
//!
//! This module provides functionality for:
//! - Fetching many URLs concurrently under a global concurrency cap
//! - Automatic retry with exponential backoff and jitter
//! - Honoring server Retry-After hints on rate-limit responses
//! - Structured per-URL outcomes that never abort the whole batch

pub mod retry;

use crate::error::Error;
use crate::signal::StopSignal;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use retry::RetryPolicy;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of concurrent requests
const DEFAULT_CONCURRENCY: usize = 50;

/// Default retry budget per request
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Configuration for the fetch engine
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum requests in flight at once
    pub max_concurrent: usize,
    /// Default timeout per request
    pub timeout: Duration,
    /// Default retry budget per request
    pub max_retries: u32,
    /// Backoff schedule between attempts
    pub retry: RetryPolicy,
    /// User agent for HTTP requests
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// One fetch to issue. Immutable once handed to the engine.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL
    pub url: String,
    /// Per-request timeout override
    pub timeout: Option<Duration>,
    /// Per-request retry budget override
    pub max_retries: Option<u32>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: None,
            max_retries: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Outcome of one fetch: payload on success, typed error on failure
#[derive(Debug)]
pub struct FetchResult {
    /// The URL that was fetched
    pub url: String,
    /// Payload bytes, or the terminal error after the retry budget ran out
    pub outcome: Result<Vec<u8>, Error>,
    /// Wall-clock time spent on this request including retries
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Payload decoded as UTF-8 text, if the fetch succeeded
    pub fn text(&self) -> Option<String> {
        self.outcome
            .as_ref()
            .ok()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }
}

/// Counters observable after (or during) a batch
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
    /// Attempts handed to the transport, retries included
    pub requests: u64,
    /// Retry attempts across all requests
    pub retries: u64,
    /// Highest number of requests in flight simultaneously
    pub peak_in_flight: usize,
}

/// Concurrent fetch engine
///
/// Every request gets an independent outcome; a failing URL never aborts
/// the others. The stop signal is checked before each unstarted request,
/// so a batch interrupted mid-way returns the results gathered so far.
#[derive(Debug)]
pub struct FetchEngine {
    config: FetcherConfig,
    client: Client,
    stop: StopSignal,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl FetchEngine {
    /// Create an engine with the given configuration and stop signal
    pub fn new(config: FetcherConfig, stop: StopSignal) -> crate::Result<Self> {
        if config.max_concurrent == 0 {
            return Err(Error::invalid_argument("max_concurrent must be at least 1"));
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::Network {
                message: format!("failed to build HTTP client: {e}"),
                url: None,
            })?;

        Ok(Self {
            config,
            client,
            stop,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    /// Fetch many URLs concurrently
    ///
    /// Returns one result per request, in completion order. An empty input
    /// succeeds trivially. If the stop signal is observed, requests that
    /// have not started are dropped and only gathered results are returned.
    pub async fn fetch_many(&self, requests: Vec<FetchRequest>) -> Vec<FetchResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        let results: Vec<Option<FetchResult>> = stream::iter(requests)
            .map(|request| {
                let sem = Arc::clone(&semaphore);
                async move {
                    // Semaphore acquire only fails if the semaphore is closed,
                    // which won't happen here since we own the Arc for the
                    // duration of the batch.
                    let _permit = sem
                        .acquire()
                        .await
                        .expect("Semaphore closed unexpectedly");

                    if self.stop.is_stopped() {
                        return None;
                    }

                    Some(self.fetch_one(request).await)
                }
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Fetch a single request, retrying per its budget
    pub async fn fetch_one(&self, request: FetchRequest) -> FetchResult {
        let started = Instant::now();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let outcome = self.fetch_with_retry(&request).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        FetchResult {
            url: request.url,
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Snapshot of the engine's counters
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }

    async fn fetch_with_retry(&self, request: &FetchRequest) -> Result<Vec<u8>, Error> {
        let timeout = request.timeout.unwrap_or(self.config.timeout);
        let budget = request.max_retries.unwrap_or(self.config.max_retries);

        // A malformed URL fails before any network call.
        if let Err(e) = Url::parse(&request.url) {
            return Err(Error::validation(format!(
                "malformed URL {}: {e}",
                request.url
            )));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&request.url, timeout).await {
                Ok(body) => {
                    if attempt > 0 {
                        debug!(url = %request.url, attempt, "fetch succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(err) if err.is_retryable() && attempt < budget => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);

                    let delay = match &err {
                        // Prefer the server's own hint over our schedule.
                        Error::RateLimit {
                            retry_after: Some(secs),
                            ..
                        } => Duration::from_secs(*secs),
                        _ => self.config.retry.delay_for(attempt),
                    };

                    warn!(
                        url = %request.url,
                        attempt,
                        budget,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url, e, timeout))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| Error::from_reqwest(url, e, timeout))?;
            return Ok(bytes.to_vec());
        }

        match status.as_u16() {
            401 => Err(Error::Authentication),
            404 => Err(Error::NotFound {
                resource: url.to_string(),
            }),
            429 => Err(Error::rate_limit_from_headers(response.headers())),
            code => Err(Error::Http {
                status: code,
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_fetcher_config_default() {
        let config = FetcherConfig::default();
        assert_eq!(config.max_concurrent, DEFAULT_CONCURRENCY);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_fetcher_config_builder() {
        let config = FetcherConfig::new()
            .with_max_concurrent(5)
            .with_timeout(Duration::from_secs(3))
            .with_max_retries(1);

        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.max_retries, 1);
    }

    #[test]
    fn test_engine_rejects_zero_concurrency() {
        let config = FetcherConfig::new().with_max_concurrent(0);
        let result = FetchEngine::new(config, StopSignal::new());
        assert!(matches!(
            result.unwrap_err().kind(),
            ErrorKind::InvalidArgument
        ));
    }

    #[test]
    fn test_fetch_request_overrides() {
        let request = FetchRequest::new("http://example.com")
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(0);
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert_eq!(request.max_retries, Some(0));
    }

    #[tokio::test]
    async fn test_empty_batch_succeeds_trivially() {
        let engine = FetchEngine::new(FetcherConfig::default(), StopSignal::new()).unwrap();
        let results = engine.fetch_many(Vec::new()).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_url_fails_without_network() {
        let engine = FetchEngine::new(FetcherConfig::default(), StopSignal::new()).unwrap();
        let results = engine
            .fetch_many(vec![FetchRequest::new("::definitely not a url::")])
            .await;

        assert_eq!(results.len(), 1);
        let err = results[0].error().expect("should fail");
        assert_eq!(err.kind(), ErrorKind::Validation);
        // No transport attempt was made for the malformed URL.
        assert_eq!(engine.stats().requests, 0);
    }

    #[tokio::test]
    async fn test_stop_before_batch_issues_nothing() {
        let stop = StopSignal::new();
        stop.request_stop();
        let engine = FetchEngine::new(FetcherConfig::default(), stop).unwrap();

        let results = engine
            .fetch_many(vec![
                FetchRequest::new("http://127.0.0.1:9/never"),
                FetchRequest::new("http://127.0.0.1:9/started"),
            ])
            .await;

        assert!(results.is_empty());
        assert_eq!(engine.stats().requests, 0);
    }

    #[test]
    fn test_fetch_result_text_on_failure_is_none() {
        let result = FetchResult {
            url: "http://x".to_string(),
            outcome: Err(Error::Authentication),
            elapsed_ms: 1,
        };
        assert!(!result.is_success());
        assert!(result.text().is_none());
    }
}
