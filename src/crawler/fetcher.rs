//! Rate-limited fetcher
//!
//! Every request to the remote tree goes through `RateLimitedFetcher::fetch`.
//! Each attempt applies, in order:
//!
//! 1. A quota pause when the last reported remaining quota is below the
//!    low-water mark (wait until the reset time plus a safety margin)
//! 2. The courtesy throttle (minimum spacing between any two requests)
//! 3. The request itself, followed by classification of the response
//!
//! Attempts run inside two nested `seatbelt` retry layers, and every wait
//! goes through one `tick::Clock`.
//!
//! # Retry Logic
//!
//! | Condition                              | Action                                   |
//! |----------------------------------------|------------------------------------------|
//! | HTTP 2xx                               | Success                                  |
//! | HTTP 429, or 403 with remaining = 0    | Cool down, retry up to `max-quota-retries` |
//! | HTTP 5xx, 403, 408, timeout, connect   | Backoff `base * 2^retry`, up to `max-retries` attempts |
//! | HTTP 404 and other 4xx                 | Immediate Fatal                          |
//!
//! Transient and quota failures never leave `fetch`; once a ceiling is hit the
//! caller sees `FetchError::Fatal`.

use crate::config::{Config, FetcherConfig};
use crate::state::RateLimitState;
use crate::ConfigError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use layered::{Execute, Service, Stack};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK};
use reqwest::Client;
use seatbelt::retry::{Backoff, OnRetryArgs, Retry};
use seatbelt::{RecoveryInfo, ResilienceContext};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tick::Clock;

/// Failure taxonomy of a fetch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Transient failure fetching {location}: {reason}")]
    Transient { location: String, reason: String },

    #[error("Quota exceeded fetching {location}")]
    QuotaExceeded { location: String },

    #[error("Fatal failure fetching {location}: {reason}")]
    Fatal { location: String, reason: String },
}

impl FetchError {
    pub fn transient(location: &str, reason: impl Into<String>) -> Self {
        Self::Transient {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    pub fn fatal(location: &str, reason: impl Into<String>) -> Self {
        Self::Fatal {
            location: location.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures absorbed by retries inside the fetcher
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::QuotaExceeded { .. })
    }
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// A response as seen by the fetcher, independent of the HTTP client
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,

    /// `x-ratelimit-remaining`
    pub remaining: Option<u64>,

    /// `x-ratelimit-reset`
    pub reset_at: Option<DateTime<Utc>>,

    /// Target of a `Link: <...>; rel="next"` header
    pub next_page: Option<String>,

    pub body: String,
}

/// A successfully fetched page of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub body: String,
    pub next_page: Option<String>,
}

/// Issues a single GET request
///
/// Implementations report network-level failures as `Transient` (or `Fatal`
/// when the request can never succeed) and return every HTTP response,
/// whatever its status, as a `RawResponse`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn get(&self, location: &str) -> FetchResult<RawResponse>;
}

/// Builds the HTTP client shared by every request of a run
///
/// Attaches the user agent, the bearer token (if configured, marked sensitive)
/// and the request timeout.
pub fn build_http_client(config: &Config) -> crate::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    if let Some(token) = config.remote.resolve_token() {
        let mut auth_val = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ConfigError::Validation("Bearer token contains invalid header characters".to_string())
        })?;
        auth_val.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_val);
    }

    let client = Client::builder()
        .user_agent(config.user_agent.header_value())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.fetcher.request_timeout))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// `Transport` backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &Config) -> crate::Result<Self> {
        Ok(Self::new(build_http_client(config)?))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, location: &str) -> FetchResult<RawResponse> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| classify_client_error(location, e))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let (remaining, reset_at) = quota_from_headers(headers);
        let next_page = headers
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_next_link);

        let body = response
            .text()
            .await
            .map_err(|e| classify_client_error(location, e))?;

        Ok(RawResponse {
            status,
            remaining,
            reset_at,
            next_page,
            body,
        })
    }
}

fn classify_client_error(location: &str, error: reqwest::Error) -> FetchError {
    if error.is_builder() {
        FetchError::fatal(location, error.to_string())
    } else if error.is_timeout() {
        FetchError::transient(location, "request timeout")
    } else if error.is_connect() {
        FetchError::transient(location, "connection failed")
    } else {
        FetchError::transient(location, error.to_string())
    }
}

/// Extracts quota metadata; each header is read independently
pub fn quota_from_headers(headers: &HeaderMap) -> (Option<u64>, Option<DateTime<Utc>>) {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    (remaining, reset_at)
}

/// Finds the `rel="next"` target in a `Link` header
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params.split(';').any(|param| {
            let param = param.trim().replace(' ', "");
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Maps a response status onto the failure taxonomy
fn classify_response(location: &str, response: RawResponse) -> FetchResult<FetchedPage> {
    match response.status {
        200..=299 => Ok(FetchedPage {
            body: response.body,
            next_page: response.next_page,
        }),
        429 => Err(FetchError::QuotaExceeded {
            location: location.to_string(),
        }),
        403 if response.remaining == Some(0) => Err(FetchError::QuotaExceeded {
            location: location.to_string(),
        }),
        403 | 408 | 500..=599 => Err(FetchError::transient(
            location,
            format!("HTTP {}", response.status),
        )),
        status => Err(FetchError::fatal(location, format!("HTTP {}", status))),
    }
}

/// Quota-aware fetcher with retry, backoff and a courtesy throttle
///
/// The rate-limit state sits behind a `std::sync::Mutex` that is only locked
/// between suspension points, so concurrent callers share one quota view and
/// one global request pace.
pub struct RateLimitedFetcher<T: Transport = HttpTransport> {
    inner: Arc<FetcherInner<T>>,
}

/// State shared between the fetcher and the attempts it runs
struct FetcherInner<T> {
    transport: T,
    config: FetcherConfig,
    state: Mutex<RateLimitState>,
    clock: Clock,
}

impl<T: Transport> RateLimitedFetcher<T> {
    /// Creates a fetcher whose waits and retry delays run on `clock`
    pub fn new(transport: T, config: FetcherConfig, clock: Clock) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                transport,
                config,
                state: Mutex::new(RateLimitState::new()),
                clock,
            }),
        }
    }

    /// Snapshot of the current rate-limit state
    pub fn rate_limit_state(&self) -> RateLimitState {
        self.inner.lock_state().clone()
    }

    /// Fetches a location, absorbing transient and quota failures
    ///
    /// The outer layer cools down on `QuotaExceeded`; the inner layer backs
    /// off exponentially on `Transient`. Each quota retry starts a fresh
    /// transient budget.
    pub async fn fetch(&self, location: &str) -> FetchResult<FetchedPage> {
        let config = &self.inner.config;
        let max_attempts = config.max_retries.max(1);
        let max_quota_retries = config.max_quota_retries;
        let cooldown = config.quota_cooldown();

        let context = ResilienceContext::new(&self.inner.clock).name("fetch");
        let inner = Arc::clone(&self.inner);

        let service = (
            Retry::layer("quota_cooldown", &context)
                .clone_input()
                .recovery_with(move |result: &FetchResult<FetchedPage>, _| match result {
                    Err(FetchError::QuotaExceeded { .. }) => RecoveryInfo::retry().delay(cooldown),
                    _ => RecoveryInfo::never(),
                })
                .max_retry_attempts(max_quota_retries)
                .on_retry(move |result: &FetchResult<FetchedPage>, args: OnRetryArgs| {
                    if let Err(e) = result {
                        tracing::warn!(
                            "{}, cooling down {:?} (retry {}/{})",
                            e,
                            args.retry_delay(),
                            args.attempt().index() + 1,
                            max_quota_retries
                        );
                    }
                }),
            Retry::layer("transient_backoff", &context)
                .clone_input()
                .recovery_with(|result: &FetchResult<FetchedPage>, _| match result {
                    Err(FetchError::Transient { .. }) => RecoveryInfo::retry(),
                    _ => RecoveryInfo::never(),
                })
                .max_retry_attempts(max_attempts - 1)
                .backoff(Backoff::Exponential)
                .base_delay(config.backoff_base())
                .use_jitter(false)
                .on_retry(move |result: &FetchResult<FetchedPage>, args: OnRetryArgs| {
                    if let Err(e) = result {
                        tracing::warn!(
                            "{}, retrying in {:?} (attempt {}/{})",
                            e,
                            args.retry_delay(),
                            args.attempt().index() + 1,
                            max_attempts
                        );
                    }
                }),
            Execute::new(move |location: String| {
                let inner = Arc::clone(&inner);
                async move { inner.attempt(&location).await }
            }),
        )
            .into_service();

        match service.execute(location.to_string()).await {
            Err(FetchError::Transient { reason, .. }) => Err(FetchError::fatal(
                location,
                format!("gave up after {} attempts: {}", max_attempts, reason),
            )),
            Err(FetchError::QuotaExceeded { .. }) => Err(FetchError::fatal(
                location,
                format!("quota still exceeded after {} cool-downs", max_quota_retries),
            )),
            outcome => outcome,
        }
    }

    /// Fetches a location's body as text
    pub async fn fetch_text(&self, location: &str) -> FetchResult<String> {
        Ok(self.fetch(location).await?.body)
    }
}

impl<T: Transport> FetcherInner<T> {
    fn lock_state(&self) -> MutexGuard<'_, RateLimitState> {
        // The state holds plain values; a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One request: quota pause, throttle slot, GET, classification
    async fn attempt(&self, location: &str) -> FetchResult<FetchedPage> {
        self.wait_for_quota().await;
        self.wait_for_slot().await;

        tracing::trace!("GET {}", location);
        self.transport.get(location).await.and_then(|response| {
            self.lock_state()
                .observe(response.remaining, response.reset_at);
            classify_response(location, response)
        })
    }

    async fn wait_for_quota(&self) {
        let now = DateTime::<Utc>::from(self.clock.system_time());
        let pause = self.lock_state().quota_pause(
            self.config.low_water_mark,
            self.config.quota_safety_margin(),
            now,
        );

        if let Some(pause) = pause {
            tracing::warn!(
                "Remaining quota below {}, pausing {:?} until reset",
                self.config.low_water_mark,
                pause
            );
            self.clock.delay(pause).await;
            self.lock_state().clear_quota();
        }
    }

    async fn wait_for_slot(&self) {
        let wait = self
            .lock_state()
            .reserve_slot(self.config.min_request_delay(), self.clock.instant());
        if !wait.is_zero() {
            self.clock.delay(wait).await;
        }
    }
}
