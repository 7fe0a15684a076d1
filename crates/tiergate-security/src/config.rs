use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SecurityError};

/// Thresholds of the escalation path and the security event log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Window over which requests per IP are counted for escalation.
    pub activity_window_secs: u64,

    /// More requests than this inside the activity window is suspicious.
    pub activity_threshold: u64,

    /// Maximum suspicious-activity records kept per IP.
    pub suspicious_log_max: usize,

    /// How long an IP's suspicious-activity log is retained after its last
    /// record.
    pub suspicious_retention_secs: u64,

    /// An IP is blacklisted once its log holds more than this many records.
    pub escalation_threshold: u64,

    pub blacklist_ttl_secs: u64,

    /// Capacity of the global security event log.
    pub event_log_max: usize,

    /// Capacity of the critical (SQL / command injection) event log.
    pub critical_log_max: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            activity_window_secs: 60,
            activity_threshold: 30,
            suspicious_log_max: 50,
            suspicious_retention_secs: 86_400,
            escalation_threshold: 10,
            blacklist_ttl_secs: 86_400, // 24 hours
            event_log_max: 500,
            critical_log_max: 50,
        }
    }
}

impl SecurityConfig {
    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }

    pub fn suspicious_retention(&self) -> Duration {
        Duration::from_secs(self.suspicious_retention_secs)
    }

    pub fn blacklist_ttl(&self) -> Duration {
        Duration::from_secs(self.blacklist_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("activity_window_secs", self.activity_window_secs == 0),
            ("suspicious_log_max", self.suspicious_log_max == 0),
            ("suspicious_retention_secs", self.suspicious_retention_secs == 0),
            ("blacklist_ttl_secs", self.blacklist_ttl_secs == 0),
            ("event_log_max", self.event_log_max == 0),
            ("critical_log_max", self.critical_log_max == 0),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, zero)| *zero) {
            return Err(SecurityError::InvalidConfig(format!(
                "{field} must be greater than zero"
            )));
        }
        if self.escalation_threshold as usize >= self.suspicious_log_max {
            return Err(SecurityError::InvalidConfig(format!(
                "escalation_threshold ({}) must be below suspicious_log_max ({})",
                self.escalation_threshold, self.suspicious_log_max
            )));
        }
        Ok(())
    }
}
