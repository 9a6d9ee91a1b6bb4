use crate::config::types::{
    Config, CrawlerConfig, FetcherConfig, OutputConfig, RemoteConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_remote_config(&config.remote)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_remote_config(config: &RemoteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.api_base)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api-base: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "api-base '{}' must use http or https",
            config.api_base
        )));
    }

    if config.root_path.trim_matches('/').is_empty() {
        return Err(ConfigError::Validation(
            "root-path cannot be empty".to_string(),
        ));
    }

    if config.page_size < 1 || config.page_size > 100 {
        return Err(ConfigError::Validation(format!(
            "page-size must be between 1 and 100, got {}",
            config.page_size
        )));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.max_retries < 1 || config.max_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "max-retries must be between 1 and 10, got {}",
            config.max_retries
        )));
    }

    if config.max_quota_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "max-quota-retries must be >= 1, got {}",
            config.max_quota_retries
        )));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(
            "request-timeout must be at least 1 second".to_string(),
        ));
    }

    if config.min_request_delay > 60_000 {
        return Err(ConfigError::Validation(format!(
            "min-request-delay must be <= 60000ms, got {}ms",
            config.min_request_delay
        )));
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 32 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 32, got {}",
            config.concurrency
        )));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "checkpoint-interval must be >= 1, got {}",
            config.checkpoint_interval
        )));
    }

    if config.max_run_time == Some(0) {
        return Err(ConfigError::Validation(
            "max-run-time must be positive when set".to_string(),
        ));
    }

    if config.max_publishers == Some(0) {
        return Err(ConfigError::Validation(
            "max-publishers must be positive when set".to_string(),
        ));
    }

    Ok(())
}

/// The user agent is sent on every request, so it must form a valid header
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // RFC 9110 product token characters
    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c))
    };

    if !is_token(&config.crawler_name) {
        return Err(ConfigError::Validation(format!(
            "crawler-name must be a non-empty HTTP token, got '{}'",
            config.crawler_name
        )));
    }
    if !is_token(&config.crawler_version) {
        return Err(ConfigError::Validation(format!(
            "crawler-version must be a non-empty HTTP token, got '{}'",
            config.crawler_version
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;
    check_contact_email(&config.contact_email)?;

    if reqwest::header::HeaderValue::from_str(&config.header_value()).is_err() {
        return Err(ConfigError::Validation(
            "user-agent fields must be visible ASCII".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.snapshot_dir.is_empty() {
        return Err(ConfigError::Validation(
            "snapshot-dir cannot be empty".to_string(),
        ));
    }

    if config.top_n < 1 {
        return Err(ConfigError::Validation(format!(
            "top-n must be >= 1, got {}",
            config.top_n
        )));
    }

    Ok(())
}

/// Accepts `local@domain.tld` with exactly one `@`
fn check_contact_email(email: &str) -> Result<(), ConfigError> {
    let well_formed = email
        .split_once('@')
        .filter(|(local, domain)| !local.is_empty() && !domain.contains('@'))
        .map(|(_, domain)| {
            domain
                .split('.')
                .filter(|label| !label.is_empty())
                .count()
                >= 2
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        })
        .unwrap_or(false);

    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "contact-email is not an email address: '{}'",
            email
        )))
    }
}
