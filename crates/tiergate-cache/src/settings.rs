use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::envelope::Encoding;

/// Tuning knobs for [`TieredCache`](crate::TieredCache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Enable the process-local (L1) tier
    #[serde(default = "default_local_enabled")]
    pub local_enabled: bool,

    /// Maximum number of entries kept in the local tier
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Upper bound on how long any entry may live in the local tier, in seconds
    #[serde(default = "default_local_ttl_cap_secs")]
    pub local_ttl_cap_secs: u64,

    /// Extra lifetime given to tag sets beyond the TTL of the key being tagged
    #[serde(default = "default_tag_grace_secs")]
    pub tag_grace_secs: u64,

    /// How long the shared tier is skipped after a failure before it is probed again
    #[serde(default = "default_shared_retry_secs")]
    pub shared_retry_secs: u64,

    /// Payload encoding for new writes
    #[serde(default)]
    pub encoding: Encoding,
}

fn default_local_enabled() -> bool {
    true
}

fn default_local_max_entries() -> usize {
    10_000
}

fn default_local_ttl_cap_secs() -> u64 {
    300
}

fn default_tag_grace_secs() -> u64 {
    60
}

fn default_shared_retry_secs() -> u64 {
    5
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            local_enabled: default_local_enabled(),
            local_max_entries: default_local_max_entries(),
            local_ttl_cap_secs: default_local_ttl_cap_secs(),
            tag_grace_secs: default_tag_grace_secs(),
            shared_retry_secs: default_shared_retry_secs(),
            encoding: Encoding::default(),
        }
    }
}

impl CacheSettings {
    pub fn local_ttl_cap(&self) -> Duration {
        Duration::from_secs(self.local_ttl_cap_secs)
    }

    pub fn tag_grace(&self) -> Duration {
        Duration::from_secs(self.tag_grace_secs)
    }

    pub fn shared_retry(&self) -> Duration {
        Duration::from_secs(self.shared_retry_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.local_enabled && self.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0 when the local tier is enabled".into());
        }
        if self.local_ttl_cap_secs == 0 {
            return Err("cache.local_ttl_cap_secs must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert!(settings.local_enabled);
        assert_eq!(settings.local_ttl_cap(), Duration::from_secs(300));
        assert_eq!(settings.tag_grace(), Duration::from_secs(60));
        assert_eq!(settings.encoding, Encoding::MsgPack);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let settings: CacheSettings =
            serde_json::from_str(r#"{"local_ttl_cap_secs": 30, "encoding": "json"}"#).unwrap();
        assert_eq!(settings.local_ttl_cap_secs, 30);
        assert_eq!(settings.encoding, Encoding::Json);
        assert_eq!(settings.local_max_entries, 10_000);
    }

    #[test]
    fn test_validate_rejects_zero_cap() {
        let settings = CacheSettings {
            local_ttl_cap_secs: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
