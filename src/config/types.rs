use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Manifest-Mirror
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
}

/// Remote tree location and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the contents API (e.g. "https://api.github.com")
    #[serde(rename = "api-base")]
    pub api_base: String,

    /// Path of the tree root below the API base
    #[serde(rename = "root-path")]
    pub root_path: String,

    /// Bearer token attached to every request
    #[serde(default)]
    pub token: Option<String>,

    /// Name of an environment variable holding the bearer token
    #[serde(rename = "token-env", default)]
    pub token_env: Option<String>,

    /// Entries requested per listing page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    100
}

impl RemoteConfig {
    /// Returns the listing location of the tree root
    pub fn root_location(&self) -> String {
        format!(
            "{}/{}?per_page={}",
            self.api_base.trim_end_matches('/'),
            self.root_path.trim_matches('/'),
            self.page_size
        )
    }

    /// Resolves the bearer token, preferring the inline value over the environment
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| {
                self.token_env
                    .as_deref()
                    .and_then(|name| std::env::var(name).ok())
                    .filter(|t| !t.is_empty())
            })
    }
}

/// Request pacing, quota and retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Courtesy delay between any two requests (milliseconds)
    #[serde(rename = "min-request-delay")]
    pub min_request_delay: u64,

    /// Remaining-quota count below which requests pause until the reset time
    #[serde(rename = "low-water-mark")]
    pub low_water_mark: u64,

    /// Extra wait added after the quota reset time (milliseconds)
    #[serde(rename = "quota-safety-margin")]
    pub quota_safety_margin: u64,

    /// Fixed wait after an explicit quota-exceeded response (milliseconds)
    #[serde(rename = "quota-cooldown")]
    pub quota_cooldown: u64,

    /// Retry ceiling for quota-exceeded responses
    #[serde(rename = "max-quota-retries")]
    pub max_quota_retries: u32,

    /// Total attempts for transient failures
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(rename = "backoff-base")]
    pub backoff_base: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout")]
    pub request_timeout: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            min_request_delay: 250,
            low_water_mark: 10,
            quota_safety_margin: 1000,
            quota_cooldown: 30_000,
            max_quota_retries: 10,
            max_retries: 3,
            backoff_base: 1000,
            request_timeout: 30,
        }
    }
}

impl FetcherConfig {
    pub fn min_request_delay(&self) -> Duration {
        Duration::from_millis(self.min_request_delay)
    }

    pub fn quota_safety_margin(&self) -> Duration {
        Duration::from_millis(self.quota_safety_margin)
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_millis(self.quota_cooldown)
    }

    /// Delay before the first transient retry; doubles on each further retry
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base)
    }
}

/// Crawl scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Number of publishers processed per batch
    pub concurrency: u32,

    /// Delay between packages of one publisher (milliseconds)
    #[serde(rename = "package-delay")]
    pub package_delay: u64,

    /// Number of batches between checkpoints
    #[serde(rename = "checkpoint-interval")]
    pub checkpoint_interval: u32,

    /// Run-level deadline (seconds), checked at batch boundaries
    #[serde(rename = "max-run-time")]
    pub max_run_time: Option<u64>,

    /// Upper bound on the number of publishers crawled
    #[serde(rename = "max-publishers")]
    pub max_publishers: Option<usize>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            package_delay: 100,
            checkpoint_interval: 5,
            max_run_time: None,
            max_publishers: None,
        }
    }
}

impl CrawlerConfig {
    pub fn package_delay(&self) -> Duration {
        Duration::from_millis(self.package_delay)
    }

    pub fn max_run_time(&self) -> Option<Duration> {
        self.max_run_time.map(Duration::from_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving the snapshot artifacts
    #[serde(rename = "snapshot-dir")]
    pub snapshot_dir: String,

    /// Number of entries in the top publishers/tags lists
    #[serde(rename = "top-n", default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    10
}
