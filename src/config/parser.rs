use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Reads, parses and validates a TOML configuration file
///
/// Missing `[fetcher]` and `[crawler]` tables, or missing keys inside them,
/// fall back to their defaults.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - The validated configuration
/// * `Err(ConfigError::Io)` - The file could not be read
/// * `Err(ConfigError::Parse)` - The file is not valid TOML for `Config`
/// * `Err(ConfigError::Validation | ConfigError::InvalidUrl)` - A setting is out of range
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Hex SHA-256 of the configuration file bytes
///
/// Recorded in `run.json` so a resumed run can tell whether the configuration
/// changed since the checkpoint was written.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Lowercase hex digest of the raw file bytes
/// * `Err(ConfigError::Io)` - The file could not be read
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let bytes = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Loads a configuration together with the hash of the same file
///
/// The file is read once, so the hash always matches the parsed content.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok((Config, String))` - The validated configuration and its hex SHA-256
/// * `Err(ConfigError)` - Same failures as [`load_config`]
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((config, hex::encode(Sha256::digest(content.as_bytes()))))
}
