//! Request admission for API endpoints.
//!
//! Every request passes through [`SecurityGate::evaluate`] before it reaches
//! business logic. The gate combines:
//!
//! - **[`Blacklist`]**: per-IP blocks with their own TTL
//! - **[`SuspiciousActivity`]**: escalates scanners and floods to the blacklist
//! - **[`SlidingWindowLimiter`]**: per-class sliding windows ([`RateLimitPolicy`])
//! - **[`ThreatScanner`]**: pattern heuristics for injection, traversal and XSS
//! - **[`SecurityLogger`]**: capped event log with on-demand summaries
//!
//! All state lives in the shared tier of a [`tiergate_cache::TieredCache`],
//! so every instance behind a load balancer sees the same windows, blacklist
//! and logs.

pub mod blacklist;
pub mod config;
pub mod error;
pub mod escalation;
pub mod gate;
pub mod heuristics;
pub mod limiter;
pub mod logger;
pub mod metrics;
pub mod policy;
pub mod request;

pub use blacklist::Blacklist;
pub use config::SecurityConfig;
pub use error::{Result, SecurityError};
pub use escalation::{Observation, SuspicionReason, SuspiciousActivity, SuspiciousRecord};
pub use gate::{Decision, DecisionReason, SecurityGate};
pub use heuristics::{Severity, ThreatIssue, ThreatKind, ThreatScanner, is_suspicious_user_agent};
pub use limiter::{CompositeOutcome, RateLimitStatus, SlidingWindowLimiter};
pub use logger::{RankedCount, SecurityEvent, SecurityLogger, SecuritySummary};
pub use policy::{ClassLimit, RateLimitPolicy};
pub use request::RequestContext;
