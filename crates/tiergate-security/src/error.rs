use thiserror::Error;
use tiergate_cache::StoreError;

/// Errors of the admission layer.
///
/// Admission denials are not errors: they are returned as a
/// [`Decision`](crate::Decision). What ends up here is misconfiguration,
/// caught at construction time, and bookkeeping failures that survived the
/// cache's local fallback.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("invalid rate limit for class '{class}': {message}")]
    InvalidPolicy { class: String, message: String },

    #[error("invalid security configuration: {0}")]
    InvalidConfig(String),

    #[error("rate limit identifier must not be empty")]
    EmptyIdentifier,

    #[error("security bookkeeping failed: {0}")]
    Store(#[from] StoreError),
}

impl SecurityError {
    pub fn invalid_policy(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Whether the error is a configuration mistake that should stop startup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidPolicy { .. } | Self::InvalidConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, SecurityError>;
