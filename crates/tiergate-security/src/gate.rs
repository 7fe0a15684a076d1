//! Request admission.
//!
//! ```text
//! evaluate(request)
//!   1. blacklist lookup        → 403 blacklisted
//!   2. suspicious activity     → class becomes `suspicious`; an IP promoted
//!                                to the blacklist here → 403 blacklisted
//!   3. [class, burst, ip_daily] windows, first closed one wins
//!                              → 429 rate_limit + Retry-After
//!   4. threat heuristics       → 403 security_violation on high severity,
//!                                lower severities are logged and pass
//! ```
//!
//! Every rejection and every detected issue is written to the
//! [`SecurityLogger`] before the decision is returned. Bookkeeping failures
//! are logged and the affected check is skipped; they never turn into a
//! rejection or an error.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tiergate_cache::TieredCache;

use crate::blacklist::Blacklist;
use crate::config::SecurityConfig;
use crate::error::Result;
use crate::escalation::{Observation, SuspiciousActivity};
use crate::heuristics::{ThreatIssue, ThreatScanner, has_blocking_issue};
use crate::limiter::{RateLimitStatus, SlidingWindowLimiter};
use crate::logger::SecurityLogger;
use crate::policy::{BURST_CLASS, DAILY_CLASS, RateLimitPolicy, SUSPICIOUS_CLASS};
use crate::request::RequestContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Blacklisted,
    RateLimit,
    SecurityViolation,
    Ok,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blacklisted => "blacklisted",
            Self::RateLimit => "rate_limit",
            Self::SecurityViolation => "security_violation",
            Self::Ok => "ok",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision for one request.
///
/// Carries everything the HTTP layer needs to answer: [`Decision::http_status`]
/// and `retry_after` for the `Retry-After` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Class whose window rejected the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_class: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<ThreatIssue>,
}

impl Decision {
    fn ok(issues: Vec<ThreatIssue>) -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Ok,
            message: "request admitted".to_string(),
            retry_after: None,
            limit_class: None,
            issues,
        }
    }

    fn blacklisted() -> Self {
        Self {
            allowed: false,
            reason: DecisionReason::Blacklisted,
            message: "access denied: address is blacklisted".to_string(),
            retry_after: None,
            limit_class: None,
            issues: Vec::new(),
        }
    }

    fn rate_limited(status: &RateLimitStatus) -> Self {
        Self {
            allowed: false,
            reason: DecisionReason::RateLimit,
            message: format!(
                "rate limit exceeded for '{}': {} requests allowed",
                status.class, status.limit
            ),
            retry_after: status.retry_after,
            limit_class: Some(status.class.clone()),
            issues: Vec::new(),
        }
    }

    fn violation(issues: Vec<ThreatIssue>) -> Self {
        let kinds: Vec<&str> = issues
            .iter()
            .filter(|i| i.is_blocking())
            .map(|i| i.kind.as_str())
            .collect();
        Self {
            allowed: false,
            reason: DecisionReason::SecurityViolation,
            message: format!("request blocked: {}", kinds.join(", ")),
            retry_after: None,
            limit_class: None,
            issues,
        }
    }

    /// HTTP status the caller should answer with.
    pub fn http_status(&self) -> u16 {
        match self.reason {
            DecisionReason::Ok => 200,
            DecisionReason::RateLimit => 429,
            DecisionReason::Blacklisted | DecisionReason::SecurityViolation => 403,
        }
    }
}

/// One per process, shared by every request task.
pub struct SecurityGate {
    blacklist: Arc<Blacklist>,
    escalation: SuspiciousActivity,
    limiter: SlidingWindowLimiter,
    scanner: ThreatScanner,
    logger: SecurityLogger,
}

impl SecurityGate {
    /// Fails fast on an invalid policy or configuration.
    pub fn new(
        cache: Arc<TieredCache>,
        policy: RateLimitPolicy,
        config: SecurityConfig,
    ) -> Result<Self> {
        config.validate()?;
        let limiter = SlidingWindowLimiter::new(cache.clone(), policy)?;
        let blacklist = Arc::new(Blacklist::new(cache.clone(), config.blacklist_ttl()));
        let logger = SecurityLogger::new(cache.clone(), &config);
        let escalation = SuspiciousActivity::new(cache, blacklist.clone(), config);
        Ok(Self {
            blacklist,
            escalation,
            limiter,
            scanner: ThreatScanner::new(),
            logger,
        })
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    pub fn logger(&self) -> &SecurityLogger {
        &self.logger
    }

    pub fn escalation(&self) -> &SuspiciousActivity {
        &self.escalation
    }

    /// Decide whether `request` may proceed.
    pub async fn evaluate(&self, request: &RequestContext) -> Decision {
        let decision = self.decide(request).await;
        crate::metrics::record_decision(decision.reason.as_str());
        tracing::debug!(
            ip = %request.client_ip(),
            method = %request.method,
            uri = %request.uri,
            reason = %decision.reason,
            "admission decision"
        );
        decision
    }

    /// Lift a block: remove the IP from the blacklist and forget its
    /// suspicious-activity log so it is not re-escalated on its next request.
    pub async fn unblock(&self, ip: &str) -> Result<bool> {
        let was_blacklisted = self.blacklist.remove(ip).await?;
        self.escalation.clear(ip).await?;
        Ok(was_blacklisted)
    }

    async fn decide(&self, request: &RequestContext) -> Decision {
        let ip = request.client_ip();

        match self.blacklist.contains(ip).await {
            Ok(true) => {
                self.log(
                    "blacklisted_request",
                    ip,
                    json!({ "uri": request.uri, "method": request.method }),
                )
                .await;
                return Decision::blacklisted();
            }
            Ok(false) => {}
            Err(e) => tracing::error!(ip = %ip, error = %e, "blacklist lookup failed"),
        }

        let observation = match self.escalation.observe(request).await {
            Ok(observation) => observation,
            Err(e) => {
                tracing::error!(ip = %ip, error = %e, "suspicious activity tracking failed");
                Observation::default()
            }
        };
        if let Some(reason) = observation.reason {
            self.log(
                "suspicious_activity",
                ip,
                json!({
                    "reason": reason,
                    "recentRequests": observation.recent_requests,
                    "records": observation.log_len,
                    "userAgent": request.user_agent(),
                    "uri": request.uri,
                }),
            )
            .await;
        }
        if observation.blacklisted {
            self.log(
                "ip_blacklisted",
                ip,
                json!({ "records": observation.log_len }),
            )
            .await;
            return Decision::blacklisted();
        }

        let class = if observation.is_suspicious() {
            SUSPICIOUS_CLASS
        } else {
            request.class.as_str()
        };
        match self
            .limiter
            .check_composite(ip, &[class, BURST_CLASS, DAILY_CLASS])
            .await
        {
            Ok(outcome) => {
                if let Some(status) = outcome.denied() {
                    self.log(
                        "rate_limit_exceeded",
                        ip,
                        json!({
                            "class": status.class,
                            "limit": status.limit,
                            "retryAfter": status.retry_after,
                            "uri": request.uri,
                        }),
                    )
                    .await;
                    return Decision::rate_limited(status);
                }
            }
            Err(e) => tracing::error!(ip = %ip, error = %e, "rate limit check failed"),
        }

        let issues = self.scanner.scan(request);
        for issue in &issues {
            crate::metrics::record_threat(issue.kind.as_str());
            self.log(
                issue.kind.as_str(),
                ip,
                json!({
                    "severity": issue.severity,
                    "detail": issue.detail,
                    "uri": request.uri,
                    "method": request.method,
                    "userAgent": request.user_agent(),
                }),
            )
            .await;
        }
        if has_blocking_issue(&issues) {
            Decision::violation(issues)
        } else {
            Decision::ok(issues)
        }
    }

    async fn log(&self, event_type: &str, ip: &str, details: serde_json::Value) {
        if let Err(e) = self.logger.record(event_type, ip, details).await {
            tracing::error!(event_type, ip = %ip, error = %e, "failed to record security event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::ThreatKind;
    use crate::policy::ClassLimit;
    use tiergate_cache::{CacheSettings, MemoryStore};

    const BROWSER: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0 Safari/537.36";

    fn gate(policy: RateLimitPolicy) -> SecurityGate {
        let cache = Arc::new(TieredCache::new(
            CacheSettings::default(),
            Some(Arc::new(MemoryStore::new())),
        ));
        SecurityGate::new(cache, policy, SecurityConfig::default()).unwrap()
    }

    fn browser(ip: &str) -> RequestContext {
        RequestContext::new(ip).with_user_agent(BROWSER)
    }

    #[tokio::test]
    async fn test_benign_request_is_admitted() {
        let gate = gate(RateLimitPolicy::default());
        let decision = gate
            .evaluate(&browser("203.0.113.10").with_uri("/api/imports?country=NL"))
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Ok);
        assert_eq!(decision.http_status(), 200);
        assert!(decision.issues.is_empty());
        assert!(gate.logger().events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blacklisted_ip_is_rejected_first() {
        let gate = gate(RateLimitPolicy::default());
        gate.blacklist().add("203.0.113.11").await.unwrap();

        let decision = gate
            .evaluate(&browser("203.0.113.11").with_query("q", "' or 1=1"))
            .await;
        assert_eq!(decision.reason, DecisionReason::Blacklisted);
        assert_eq!(decision.http_status(), 403);
        // Nothing past the blacklist ran.
        let events = gate.logger().events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "blacklisted_request");
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let gate = gate(RateLimitPolicy::default().with_class("export", ClassLimit::new(2, 300)));
        let req = browser("203.0.113.12").with_class("export");
        assert!(gate.evaluate(&req).await.allowed);
        assert!(gate.evaluate(&req).await.allowed);

        let denied = gate.evaluate(&req).await;
        assert_eq!(denied.reason, DecisionReason::RateLimit);
        assert_eq!(denied.http_status(), 429);
        assert_eq!(denied.limit_class.as_deref(), Some("export"));
        assert!(denied.retry_after.unwrap() > 0);
    }

    #[tokio::test]
    async fn test_burst_window_applies_to_every_class() {
        let gate = gate(RateLimitPolicy::default());
        let req = browser("203.0.113.13");
        for _ in 0..10 {
            assert!(gate.evaluate(&req).await.allowed);
        }
        let denied = gate.evaluate(&req).await;
        assert_eq!(denied.reason, DecisionReason::RateLimit);
        assert_eq!(denied.limit_class.as_deref(), Some("burst"));
    }

    #[tokio::test]
    async fn test_suspicious_requests_use_suspicious_class() {
        let gate = gate(RateLimitPolicy::default());
        let req = RequestContext::new("203.0.113.14").with_user_agent("python-requests/2.32");
        for _ in 0..5 {
            let decision = gate.evaluate(&req).await;
            assert!(decision.allowed);
            assert_eq!(decision.issues[0].kind, ThreatKind::SuspiciousHeaders);
        }
        let denied = gate.evaluate(&req).await;
        assert_eq!(denied.reason, DecisionReason::RateLimit);
        assert_eq!(denied.limit_class.as_deref(), Some("suspicious"));
    }

    #[tokio::test]
    async fn test_high_severity_blocks_medium_passes() {
        let gate = gate(RateLimitPolicy::default());

        let sqli = gate
            .evaluate(&browser("203.0.113.15").with_query("id", "1; DROP TABLE users"))
            .await;
        assert_eq!(sqli.reason, DecisionReason::SecurityViolation);
        assert_eq!(sqli.http_status(), 403);
        assert!(sqli.message.contains("sql_injection"));

        let xss = gate
            .evaluate(&browser("203.0.113.16").with_query("name", "<img onerror=alert(1)>"))
            .await;
        assert!(xss.allowed);
        assert_eq!(xss.issues.len(), 1);
        assert_eq!(xss.issues[0].kind, ThreatKind::Xss);

        let summary = gate.logger().summarize().await.unwrap();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.critical_events, 1);
    }

    #[tokio::test]
    async fn test_url_encoded_injection_in_uri_is_rejected() {
        let gate = gate(RateLimitPolicy::default());

        let percent = gate
            .evaluate(&browser("203.0.113.17").with_uri("/api/search?q=x%27%20OR%20%271%27%3D%271"))
            .await;
        assert_eq!(percent.reason, DecisionReason::SecurityViolation);
        assert_eq!(percent.http_status(), 403);

        let plus = gate
            .evaluate(&browser("203.0.113.18").with_uri("/api/search?q=x'+OR+'1'='1"))
            .await;
        assert_eq!(plus.reason, DecisionReason::SecurityViolation);
        assert!(plus.message.contains("sql_injection"));
    }

    #[tokio::test]
    async fn test_promotion_during_evaluation_rejects_immediately() {
        let gate = gate(RateLimitPolicy::default().with_class("suspicious", ClassLimit::new(100, 300)));
        let req = RequestContext::new("203.0.113.17").with_user_agent("masscan/1.3");
        for _ in 0..10 {
            assert!(gate.evaluate(&req).await.allowed);
        }
        let eleventh = gate.evaluate(&req).await;
        assert_eq!(eleventh.reason, DecisionReason::Blacklisted);
        assert!(gate.blacklist().contains("203.0.113.17").await.unwrap());

        assert!(gate.unblock("203.0.113.17").await.unwrap());
        assert!(!gate.blacklist().contains("203.0.113.17").await.unwrap());
    }

    #[test]
    fn test_decision_serialization() {
        let status = RateLimitStatus {
            allowed: false,
            class: "search".into(),
            limit: 30,
            remaining: 0,
            reset_at: 1_700_000_060,
            retry_after: Some(12),
        };
        let json = serde_json::to_value(Decision::rate_limited(&status)).unwrap();
        assert_eq!(json["reason"], "rate_limit");
        assert_eq!(json["retryAfter"], 12);
        assert_eq!(json["limitClass"], "search");
        assert!(json.get("issues").is_none());
    }
}
