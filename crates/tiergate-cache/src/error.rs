use thiserror::Error;

/// Failures of a shared-tier backend.
///
/// These never reach callers of [`TieredCache`](crate::TieredCache): the cache
/// logs them, marks the tier down and keeps serving from the local tier.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared tier unavailable: {0}")]
    Unavailable(String),

    #[error("shared tier timed out after {0} ms")]
    Timeout(u64),

    #[error("shared tier backend error: {0}")]
    Backend(String),

    #[error("stored value could not be decoded: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Whether the failure means the tier itself is unreachable, as opposed to
    /// one bad value.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Backend(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout(0)
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced to cache callers.
///
/// Only caller mistakes and producer failures end up here; tier outages and
/// undecodable payloads are absorbed by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key must not be empty")]
    EmptyKey,

    #[error("invalid TTL for key '{key}': TTL must be at least 1 ms")]
    InvalidTtl { key: String },

    #[error("tag must not be empty (key '{key}')")]
    EmptyTag { key: String },

    #[error("failed to encode value for key '{key}': {message}")]
    Encode { key: String, message: String },

    #[error("producer failed for key '{key}': {source}")]
    Producer {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl CacheError {
    pub fn encode(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Encode {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// True for errors caused by invalid arguments rather than by the producer.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyKey | Self::InvalidTtl { .. } | Self::EmptyTag { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
