//! HTTP fetching with exponential backoff retry logic.
//!
//! Collectors never talk to `reqwest` directly. They go through the [`Fetch`]
//! trait, which keeps them testable against canned responses and lets the
//! retry policy be layered on as a decorator:
//!
//! - [`Fetch`]: core trait, one request in, one response body out
//! - [`HttpFetch`]: the `reqwest`-backed implementation
//! - [`RetryFetch`]: decorator that retries transient failures of any [`Fetch`]
//!
//! # Retry Strategy
//!
//! - Transport errors, timeouts and HTTP 408/429/5xx are retried
//! - Other HTTP errors (404, 403, ...) fail immediately
//! - Exponential backoff from a base delay, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; rival_watch/0.1; +https://github.com/rival-watch/rival_watch)";

/// Errors produced while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The response body could not be read.
    #[error("reading body of {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } | FetchError::Body { .. } => true,
            FetchError::Status { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
        }
    }
}

/// HTTP method of a [`FetchRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single HTTP request issued by a collector.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl FetchRequest {
    /// A plain `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            json: None,
        }
    }

    /// A `POST` request with a JSON body.
    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            json: Some(body),
        }
    }

    /// Add a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Trait for async HTTP fetching.
///
/// Implementors take a request and return the response body as text.
pub trait Fetch {
    /// Perform `req` and return the response body.
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError>;
}

/// [`Fetch`] implementation backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: reqwest::Client,
}

impl HttpFetch {
    /// Build a client with a 15 second timeout and a browser-like user agent.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetch {
    #[instrument(level = "debug", skip_all, fields(url = %req.url))]
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let mut builder = match req.method {
            Method::Get => self.client.get(&req.url),
            Method::Post => self.client.post(&req.url),
        };
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &req.json {
            builder = builder.json(body);
        }

        let t0 = Instant::now();
        let resp = builder.send().await.map_err(|source| FetchError::Transport {
            url: req.url.clone(),
            source,
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: req.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|source| FetchError::Body {
            url: req.url.clone(),
            source,
        })?;
        debug!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            bytes = body.len(),
            "Fetched"
        );
        Ok(body)
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetch`] implementation.
///
/// The delay before retry `n` (1-based) is:
/// ```text
/// delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=max_jitter)
/// ```
pub struct RetryFetch<T> {
    /// The underlying fetcher.
    inner: T,
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Delay before the first retry (doubles with each attempt).
    base_delay: Duration,
    /// Cap on the exponential part of the delay.
    max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    max_jitter: Duration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    /// Wrap `inner`, retrying transient failures up to `max_retries` times.
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher doing the actual requests
    /// * `max_retries` - Retries after the first attempt; `0` disables retrying
    /// * `base_delay` - Delay before the first retry, doubled on each further one
    ///
    /// # Returns
    ///
    /// A decorator capping each delay at 30 seconds plus up to 250ms of jitter.
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    /// Override the jitter bound.
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt - 1).min(31) as u32;
        let delay = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    #[instrument(level = "debug", skip_all, fields(url = %req.url))]
    async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(req).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() {
                        return Err(e);
                    }
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// In-memory [`Fetch`] serving canned bodies, for collector tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::{Fetch, FetchError, FetchRequest};
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves `routes[url]`; unknown URLs answer with `status_for_missing`.
    #[derive(Debug, Default)]
    pub struct Canned {
        routes: HashMap<String, String>,
        status_for_missing: u16,
        pub requests: RefCell<Vec<FetchRequest>>,
    }

    impl Canned {
        pub fn new() -> Self {
            Self {
                status_for_missing: 404,
                ..Default::default()
            }
        }

        pub fn route(mut self, url: &str, body: &str) -> Self {
            self.routes.insert(url.to_string(), body.to_string());
            self
        }

        pub fn missing_status(mut self, status: u16) -> Self {
            self.status_for_missing = status;
            self
        }
    }

    impl Fetch for Canned {
        async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
            self.requests.borrow_mut().push(req.clone());
            self.routes
                .get(&req.url)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    url: req.url.clone(),
                    status: self.status_for_missing,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Canned;
    use super::*;
    use std::cell::Cell;

    /// Fails with the given status `failures` times, then succeeds.
    struct Flaky {
        failures: usize,
        status: u16,
        calls: Cell<usize>,
    }

    impl Fetch for Flaky {
        async fn fetch(&self, req: &FetchRequest) -> Result<String, FetchError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n <= self.failures {
                Err(FetchError::Status {
                    url: req.url.clone(),
                    status: self.status,
                })
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn retrying(inner: Flaky, max_retries: usize) -> RetryFetch<Flaky> {
        RetryFetch::new(inner, max_retries, Duration::from_millis(1)).with_max_jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let api = retrying(Flaky { failures: 2, status: 503, calls: Cell::new(0) }, 3);
        let body = api.fetch(&FetchRequest::get("https://x.test")).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(api.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let api = retrying(Flaky { failures: 10, status: 429, calls: Cell::new(0) }, 2);
        let err = api.fetch(&FetchRequest::get("https://x.test")).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 429, .. }));
        assert_eq!(api.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_failures() {
        let api = retrying(Flaky { failures: 10, status: 404, calls: Cell::new(0) }, 5);
        assert!(api.fetch(&FetchRequest::get("https://x.test")).await.is_err());
        assert_eq!(api.inner.calls.get(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let api = RetryFetch::new(Canned::new(), 5, Duration::from_secs(1))
            .with_max_jitter(Duration::ZERO);
        assert_eq!(api.backoff(1), Duration::from_secs(1));
        assert_eq!(api.backoff(2), Duration::from_secs(2));
        assert_eq!(api.backoff(3), Duration::from_secs(4));
        assert_eq!(api.backoff(6), Duration::from_secs(30));
        assert_eq!(api.backoff(60), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_classification() {
        let status = |status| FetchError::Status { url: "u".into(), status };
        assert!(status(500).is_transient());
        assert!(status(502).is_transient());
        assert!(status(429).is_transient());
        assert!(status(408).is_transient());
        assert!(!status(404).is_transient());
        assert!(!status(403).is_transient());
    }

    #[tokio::test]
    async fn test_canned_records_requests() {
        let canned = Canned::new().route("https://a.test/feed", "<rss/>");
        assert_eq!(canned.fetch(&FetchRequest::get("https://a.test/feed")).await.unwrap(), "<rss/>");
        assert!(canned.fetch(&FetchRequest::get("https://a.test/other")).await.is_err());
        assert_eq!(canned.requests.borrow().len(), 2);
    }
}
