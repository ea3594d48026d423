//! Environment configuration.

use crate::logging::{default_log_level, normalize_level};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DATABASE: &str = "STOREDAL_DATABASE";
pub const ENV_LOG_LEVEL: &str = "STOREDAL_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "STOREDAL_LOG_DIR";
pub const ENV_INDEXER_BATCH_SIZE: &str = "STOREDAL_INDEXER_BATCH_SIZE";
pub const ENV_HTTP_CACHE_TTL_SECS: &str = "STOREDAL_HTTP_CACHE_TTL_SECS";

const DEFAULT_DATABASE: &str = "storedal.sqlite3";
const DEFAULT_INDEXER_BATCH_SIZE: usize = 50;
const DEFAULT_HTTP_CACHE_TTL_SECS: u64 = 7200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
        }
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DalConfig {
    pub database: PathBuf,
    pub log_level: &'static str,
    /// File logging is disabled when unset.
    pub log_dir: Option<PathBuf>,
    pub indexer_batch_size: usize,
    pub http_cache_ttl: Duration,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            log_level: default_log_level(),
            log_dir: None,
            indexer_batch_size: DEFAULT_INDEXER_BATCH_SIZE,
            http_cache_ttl: Duration::from_secs(DEFAULT_HTTP_CACHE_TTL_SECS),
        }
    }
}

impl DalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or blank keys keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(database) = get(ENV_DATABASE) {
            config.database = PathBuf::from(database);
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&level).map_err(|_| ConfigError::InvalidValue {
                key: ENV_LOG_LEVEL,
                value: level.clone(),
            })?;
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            config.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = get(ENV_INDEXER_BATCH_SIZE) {
            config.indexer_batch_size = match raw.trim().parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_INDEXER_BATCH_SIZE,
                        value: raw,
                    })
                }
            };
        }
        if let Some(raw) = get(ENV_HTTP_CACHE_TTL_SECS) {
            let secs = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_HTTP_CACHE_TTL_SECS,
                value: raw.clone(),
            })?;
            config.http_cache_ttl = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, DalConfig, ENV_INDEXER_BATCH_SIZE, ENV_LOG_LEVEL};
    use std::collections::BTreeMap;

    fn config(pairs: &[(&str, &str)]) -> Result<DalConfig, ConfigError> {
        let vars: BTreeMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        DalConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config, DalConfig::default());
        assert_eq!(config.indexer_batch_size, 50);
        assert_eq!(config.http_cache_ttl.as_secs(), 7200);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert_eq!(
            config(&[(ENV_INDEXER_BATCH_SIZE, "0")]),
            Err(ConfigError::InvalidValue {
                key: ENV_INDEXER_BATCH_SIZE,
                value: "0".to_string(),
            })
        );
    }

    #[test]
    fn log_level_is_normalized() {
        assert_eq!(config(&[(ENV_LOG_LEVEL, "WARNING")]).unwrap().log_level, "warn");
        assert!(config(&[(ENV_LOG_LEVEL, "loud")]).is_err());
    }
}
