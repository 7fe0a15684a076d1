//! Security event log.
//!
//! Events go to a global capped list `security:events` in the shared tier.
//! SQL and command injection events are also copied to `security:critical`.
//! Summaries are computed by scanning the list when asked; nothing is
//! aggregated incrementally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration as TimeDuration, OffsetDateTime};
use tiergate_cache::TieredCache;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::error::Result;
use crate::heuristics::ThreatKind;

pub const EVENTS_KEY: &str = "security:events";
pub const CRITICAL_KEY: &str = "security:critical";

const TOP_TYPES: usize = 5;
const TOP_IPS: usize = 10;

/// Event types that also go to the critical log.
pub fn is_critical(event_type: &str) -> bool {
    event_type == ThreatKind::SqlInjection.as_str()
        || event_type == ThreatKind::CommandInjection.as_str()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub event_type: String,
    pub ip: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySummary {
    pub total_events: usize,
    pub critical_events: usize,
    pub events_last_hour: usize,
    pub top_threat_types: Vec<RankedCount>,
    #[serde(rename = "topThreatIPs")]
    pub top_threat_ips: Vec<RankedCount>,
}

pub struct SecurityLogger {
    cache: Arc<TieredCache>,
    max_events: usize,
    max_critical: usize,
}

impl SecurityLogger {
    pub fn new(cache: Arc<TieredCache>, config: &SecurityConfig) -> Self {
        Self {
            cache,
            max_events: config.event_log_max,
            max_critical: config.critical_log_max,
        }
    }

    /// Append an event to the log (and the critical log when it applies).
    pub async fn record(
        &self,
        event_type: &str,
        ip: &str,
        details: serde_json::Value,
    ) -> Result<SecurityEvent> {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            timestamp: OffsetDateTime::now_utc(),
            event_type: event_type.to_string(),
            ip: ip.to_string(),
            details,
        };
        self.cache
            .push_capped(EVENTS_KEY, &event, self.max_events, None)
            .await?;
        let critical = is_critical(event_type);
        if critical {
            self.cache
                .push_capped(CRITICAL_KEY, &event, self.max_critical, None)
                .await?;
        }
        tracing::warn!(
            target: "security",
            event_id = %event.id,
            event_type = %event.event_type,
            ip = %event.ip,
            critical,
            details = %event.details,
            "security event"
        );
        Ok(event)
    }

    /// Logged events, newest first.
    pub async fn events(&self) -> Result<Vec<SecurityEvent>> {
        Ok(self.cache.read_list(EVENTS_KEY).await?)
    }

    pub async fn critical_events(&self) -> Result<Vec<SecurityEvent>> {
        Ok(self.cache.read_list(CRITICAL_KEY).await?)
    }

    pub async fn summarize(&self) -> Result<SecuritySummary> {
        let events = self.events().await?;
        let critical = self.critical_events().await?;
        Ok(summarize_events(
            &events,
            critical.len(),
            OffsetDateTime::now_utc(),
        ))
    }
}

fn summarize_events(
    events: &[SecurityEvent],
    critical_events: usize,
    now: OffsetDateTime,
) -> SecuritySummary {
    let hour_ago = now - TimeDuration::hours(1);
    let mut types: HashMap<&str, usize> = HashMap::new();
    let mut ips: HashMap<&str, usize> = HashMap::new();
    for event in events {
        *types.entry(&event.event_type).or_default() += 1;
        *ips.entry(&event.ip).or_default() += 1;
    }
    SecuritySummary {
        total_events: events.len(),
        critical_events,
        events_last_hour: events.iter().filter(|e| e.timestamp >= hour_ago).count(),
        top_threat_types: top(types, TOP_TYPES),
        top_threat_ips: top(ips, TOP_IPS),
    }
}

/// Highest counts first; ties broken alphabetically so output is stable.
fn top(counts: HashMap<&str, usize>, n: usize) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(value, count)| RankedCount {
            value: value.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    ranked.truncate(n);
    ranked
}
