use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiergate_cache::CacheSettings;
use tiergate_security::{RateLimitPolicy, SecurityConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Shared tier (Redis) configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Tiered cache tuning
    #[serde(default)]
    pub cache: CacheSettings,
    /// Rate-limit class overrides, merged onto the default table
    #[serde(default)]
    pub rate_limits: RateLimitPolicy,
    /// Escalation and security log thresholds
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Configuration errors. All of them stop startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[source] config::ConfigError),

    #[error("config deserialize error: {0}")]
    Deserialize(#[source] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err(ConfigError::Invalid("redis.url must not be empty".into()));
            }
            if self.redis.pool_size == 0 {
                return Err(ConfigError::Invalid("redis.pool_size must be > 0".into()));
            }
            if self.redis.timeout_ms == 0 {
                return Err(ConfigError::Invalid("redis.timeout_ms must be > 0".into()));
            }
        }
        self.cache
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("cache: {e}")))?;
        self.rate_limits
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("rate_limits: {e}")))?;
        self.security
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("security: {e}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration for the shared cache tier.
///
/// When disabled (the default), or when Redis cannot be reached at startup,
/// the cache runs on its local tier and the admission layer keeps its
/// bookkeeping in process memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (disabled for single-instance deployments)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-operation timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prefix for every key this deployment writes
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_key_prefix() -> String {
    "tiergate:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "tiergate.toml";

    /// Load configuration from an optional TOML file, then environment
    /// overrides such as `TIERGATE__REDIS__ENABLED=true`, then validate.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = %pathbuf.display(), "config file not found, using defaults");
        }
        builder = builder.add_source(
            Environment::with_prefix("TIERGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build().map_err(ConfigError::Build)?;
        let merged: AppConfig = cfg.try_deserialize().map_err(ConfigError::Deserialize)?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.redis.enabled);
        assert_eq!(config.redis.key_prefix, "tiergate:");
        assert_eq!(config.redis.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_redis_checks_only_when_enabled() {
        let mut config = AppConfig::default();
        config.redis.pool_size = 0;
        assert!(config.validate().is_ok());
        config.redis.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_nested_errors_are_prefixed() {
        let mut config = AppConfig::default();
        config.security.event_log_max = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().starts_with("invalid configuration: security:"));
    }
}
