//! Suspicious-activity escalation.
//!
//! Every request from an IP is counted in `activity:{ip}`. A request is
//! suspicious when its user agent looks like a scanner or bot, or when the IP
//! has sent more than `activity_threshold` requests inside the activity
//! window. Each suspicious request appends a record to `suspicious:{ip}`
//! (newest first, capped); once that log holds more than
//! `escalation_threshold` records the IP is blacklisted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tiergate_cache::{TieredCache, now_millis};

use crate::blacklist::Blacklist;
use crate::config::SecurityConfig;
use crate::error::Result;
use crate::heuristics::is_suspicious_user_agent;
use crate::request::RequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    SuspiciousUserAgent,
    HighRequestRate,
}

impl SuspicionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuspiciousUserAgent => "suspicious_user_agent",
            Self::HighRequestRate => "high_request_rate",
        }
    }
}

/// One entry of an IP's suspicious-activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub reason: SuspicionReason,
    pub user_agent: String,
    pub uri: String,
}

/// What escalation concluded about one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// Set when this request was suspicious.
    pub reason: Option<SuspicionReason>,
    /// Requests from this IP inside the activity window, this one included.
    pub recent_requests: u64,
    /// Length of the IP's suspicious-activity log after this request.
    pub log_len: u64,
    /// Whether this request pushed the IP onto the blacklist.
    pub blacklisted: bool,
}

impl Observation {
    pub fn is_suspicious(&self) -> bool {
        self.reason.is_some()
    }
}

pub struct SuspiciousActivity {
    cache: Arc<TieredCache>,
    blacklist: Arc<Blacklist>,
    config: SecurityConfig,
}

impl SuspiciousActivity {
    pub fn new(cache: Arc<TieredCache>, blacklist: Arc<Blacklist>, config: SecurityConfig) -> Self {
        Self {
            cache,
            blacklist,
            config,
        }
    }

    pub fn activity_key(ip: &str) -> String {
        format!("activity:{ip}")
    }

    pub fn log_key(ip: &str) -> String {
        format!("suspicious:{ip}")
    }

    /// Count `request`, record it if suspicious and escalate when the IP's
    /// log passes the threshold.
    pub async fn observe(&self, request: &RequestContext) -> Result<Observation> {
        let ip = request.client_ip();
        let window = self.config.activity_window();
        let snapshot = self
            .cache
            .record_in_window(&Self::activity_key(ip), now_millis(), window, u64::MAX, window)
            .await?;
        let recent_requests = snapshot.count + 1;

        let reason = if is_suspicious_user_agent(request.user_agent()) {
            Some(SuspicionReason::SuspiciousUserAgent)
        } else if recent_requests > self.config.activity_threshold {
            Some(SuspicionReason::HighRequestRate)
        } else {
            None
        };
        let Some(reason) = reason else {
            return Ok(Observation {
                recent_requests,
                ..Default::default()
            });
        };

        let record = SuspiciousRecord {
            timestamp: OffsetDateTime::now_utc(),
            reason,
            user_agent: request.user_agent().to_string(),
            uri: request.uri.clone(),
        };
        let log_len = self
            .cache
            .push_capped(
                &Self::log_key(ip),
                &record,
                self.config.suspicious_log_max,
                Some(self.config.suspicious_retention()),
            )
            .await?;
        crate::metrics::record_suspicious_activity(reason.as_str());
        tracing::debug!(ip = %ip, reason = reason.as_str(), log_len, "suspicious activity recorded");

        let blacklisted = log_len > self.config.escalation_threshold;
        if blacklisted {
            self.blacklist.add(ip).await?;
            tracing::warn!(
                ip = %ip,
                records = log_len,
                "suspicious activity threshold exceeded, ip blacklisted"
            );
        }

        Ok(Observation {
            reason: Some(reason),
            recent_requests,
            log_len,
            blacklisted,
        })
    }

    /// The IP's suspicious-activity log, newest first.
    pub async fn records(&self, ip: &str) -> Result<Vec<SuspiciousRecord>> {
        Ok(self.cache.read_list(&Self::log_key(ip)).await?)
    }

    /// Forget an IP's suspicious-activity log. Used together with
    /// [`Blacklist::remove`] when an operator lifts a block.
    pub async fn clear(&self, ip: &str) -> Result<bool> {
        Ok(self.cache.unmark(&Self::log_key(ip)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tiergate_cache::{CacheSettings, MemoryStore};

    const BROWSER: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Safari/605.1.15";

    fn escalator(config: SecurityConfig) -> (SuspiciousActivity, Arc<Blacklist>) {
        let cache = Arc::new(TieredCache::new(
            CacheSettings::default(),
            Some(Arc::new(MemoryStore::new())),
        ));
        let blacklist = Arc::new(Blacklist::new(cache.clone(), Duration::from_secs(86_400)));
        (
            SuspiciousActivity::new(cache, blacklist.clone(), config),
            blacklist,
        )
    }

    #[tokio::test]
    async fn test_normal_traffic_is_not_recorded() {
        let (escalator, _) = escalator(SecurityConfig::default());
        let req = RequestContext::new("203.0.113.1").with_user_agent(BROWSER);
        for expected in 1..=5 {
            let observation = escalator.observe(&req).await.unwrap();
            assert!(!observation.is_suspicious());
            assert_eq!(observation.recent_requests, expected);
        }
        assert!(escalator.records("203.0.113.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_agent_match_is_recorded() {
        let (escalator, _) = escalator(SecurityConfig::default());
        let req = RequestContext::new("203.0.113.2")
            .with_user_agent("sqlmap/1.7")
            .with_uri("/api/search");
        let observation = escalator.observe(&req).await.unwrap();
        assert_eq!(observation.reason, Some(SuspicionReason::SuspiciousUserAgent));
        assert_eq!(observation.log_len, 1);

        let records = escalator.records("203.0.113.2").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_agent, "sqlmap/1.7");
        assert_eq!(records[0].uri, "/api/search");
    }

    #[tokio::test]
    async fn test_high_rate_is_recorded_past_threshold() {
        let config = SecurityConfig {
            activity_threshold: 3,
            ..Default::default()
        };
        let (escalator, _) = escalator(config);
        let req = RequestContext::new("203.0.113.3").with_user_agent(BROWSER);
        for _ in 0..3 {
            assert!(!escalator.observe(&req).await.unwrap().is_suspicious());
        }
        let fourth = escalator.observe(&req).await.unwrap();
        assert_eq!(fourth.reason, Some(SuspicionReason::HighRequestRate));
        assert_eq!(fourth.recent_requests, 4);
    }

    #[tokio::test]
    async fn test_eleventh_record_blacklists() {
        let (escalator, blacklist) = escalator(SecurityConfig::default());
        let req = RequestContext::new("203.0.113.4").with_user_agent("nikto/2.5");

        for n in 1..=10 {
            let observation = escalator.observe(&req).await.unwrap();
            assert_eq!(observation.log_len, n);
            assert!(!observation.blacklisted);
        }
        assert!(!blacklist.contains("203.0.113.4").await.unwrap());

        let eleventh = escalator.observe(&req).await.unwrap();
        assert!(eleventh.blacklisted);
        assert!(blacklist.contains("203.0.113.4").await.unwrap());
    }

    #[tokio::test]
    async fn test_log_is_capped() {
        let config = SecurityConfig {
            suspicious_log_max: 12,
            escalation_threshold: 100,
            ..Default::default()
        };
        let (escalator, _) = escalator(config);
        let req = RequestContext::new("203.0.113.5").with_user_agent("");
        for _ in 0..20 {
            escalator.observe(&req).await.unwrap();
        }
        assert_eq!(escalator.records("203.0.113.5").await.unwrap().len(), 12);
        assert!(escalator.clear("203.0.113.5").await.unwrap());
        assert!(escalator.records("203.0.113.5").await.unwrap().is_empty());
    }
}
