//! Rate-limit classes.
//!
//! A class is a named `(requests, window)` pair. The table ships with
//! defaults and any class can be overridden or added from configuration:
//!
//! ```toml
//! [rate_limits.search]
//! requests = 60
//! window_secs = 60
//! ```
//!
//! Classes that are not listed in the configuration keep their defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, SecurityError};

pub const DEFAULT_CLASS: &str = "default";
pub const SEARCH_CLASS: &str = "search";
pub const EXPORT_CLASS: &str = "export";
pub const UPLOAD_CLASS: &str = "upload";
pub const BURST_CLASS: &str = "burst";
pub const DAILY_CLASS: &str = "ip_daily";
pub const SUSPICIOUS_CLASS: &str = "suspicious";

/// Limit of one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLimit {
    /// Requests admitted per window.
    pub requests: u64,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl ClassLimit {
    pub const fn new(requests: u64, window_secs: u64) -> Self {
        Self {
            requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Table of rate-limit classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, ClassLimit>", into = "BTreeMap<String, ClassLimit>")]
pub struct RateLimitPolicy {
    classes: BTreeMap<String, ClassLimit>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        let classes = [
            (DEFAULT_CLASS, ClassLimit::new(100, 60)),
            (SEARCH_CLASS, ClassLimit::new(30, 60)),
            (EXPORT_CLASS, ClassLimit::new(10, 300)),
            (UPLOAD_CLASS, ClassLimit::new(20, 3600)),
            (BURST_CLASS, ClassLimit::new(10, 10)),
            (DAILY_CLASS, ClassLimit::new(5000, 86_400)),
            (SUSPICIOUS_CLASS, ClassLimit::new(5, 300)),
        ]
        .into_iter()
        .map(|(name, limit)| (name.to_string(), limit))
        .collect();
        Self { classes }
    }
}

impl From<BTreeMap<String, ClassLimit>> for RateLimitPolicy {
    /// Overlay `overrides` on the default table.
    fn from(overrides: BTreeMap<String, ClassLimit>) -> Self {
        let mut policy = Self::default();
        policy.classes.extend(overrides);
        policy
    }
}

impl From<RateLimitPolicy> for BTreeMap<String, ClassLimit> {
    fn from(policy: RateLimitPolicy) -> Self {
        policy.classes
    }
}

impl RateLimitPolicy {
    /// Add or replace a class.
    pub fn with_class(mut self, name: impl Into<String>, limit: ClassLimit) -> Self {
        self.classes.insert(name.into(), limit);
        self
    }

    /// Resolve `class` to its limit. Unknown classes fall back to `default`,
    /// and the returned name is the class whose limit applies.
    pub fn resolve<'a>(&'a self, class: &'a str) -> (&'a str, ClassLimit) {
        match self.classes.get(class) {
            Some(limit) => (class, *limit),
            None => (DEFAULT_CLASS, self.default_limit()),
        }
    }

    pub fn get(&self, class: &str) -> Option<ClassLimit> {
        self.classes.get(class).copied()
    }

    pub fn classes(&self) -> impl Iterator<Item = (&str, ClassLimit)> {
        self.classes.iter().map(|(name, limit)| (name.as_str(), *limit))
    }

    fn default_limit(&self) -> ClassLimit {
        self.classes
            .get(DEFAULT_CLASS)
            .copied()
            .unwrap_or(ClassLimit::new(100, 60))
    }

    /// Every class needs a non-zero request count and window.
    pub fn validate(&self) -> Result<()> {
        for (name, limit) in &self.classes {
            if name.is_empty() {
                return Err(SecurityError::invalid_policy(name, "class name must not be empty"));
            }
            if limit.requests == 0 {
                return Err(SecurityError::invalid_policy(
                    name,
                    "requests must be greater than zero",
                ));
            }
            if limit.window_secs == 0 {
                return Err(SecurityError::invalid_policy(
                    name,
                    "window_secs must be greater than zero",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.get("default"), Some(ClassLimit::new(100, 60)));
        assert_eq!(policy.get("search"), Some(ClassLimit::new(30, 60)));
        assert_eq!(policy.get("export"), Some(ClassLimit::new(10, 300)));
        assert_eq!(policy.get("upload"), Some(ClassLimit::new(20, 3600)));
        assert_eq!(policy.get("burst"), Some(ClassLimit::new(10, 10)));
        assert_eq!(policy.get("ip_daily"), Some(ClassLimit::new(5000, 86_400)));
        assert_eq!(policy.get("suspicious"), Some(ClassLimit::new(5, 300)));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_unknown_class_falls_back_to_default() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.resolve("charts"), ("default", ClassLimit::new(100, 60)));
        assert_eq!(policy.resolve("search"), ("search", ClassLimit::new(30, 60)));
    }

    #[test]
    fn test_overrides_merge_onto_defaults() {
        let overrides: BTreeMap<String, ClassLimit> =
            serde_json::from_str(r#"{"search": {"requests": 60, "window_secs": 30}, "charts": {"requests": 5, "window_secs": 1}}"#)
                .unwrap();
        let policy = RateLimitPolicy::from(overrides);
        assert_eq!(policy.get("search"), Some(ClassLimit::new(60, 30)));
        assert_eq!(policy.get("charts"), Some(ClassLimit::new(5, 1)));
        assert_eq!(policy.get("burst"), Some(ClassLimit::new(10, 10)));
    }

    #[test]
    fn test_deserialize_through_serde_from() {
        let policy: RateLimitPolicy =
            serde_json::from_str(r#"{"export": {"requests": 1, "window_secs": 60}}"#).unwrap();
        assert_eq!(policy.get("export"), Some(ClassLimit::new(1, 60)));
        assert_eq!(policy.get("default"), Some(ClassLimit::new(100, 60)));
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let policy = RateLimitPolicy::default().with_class("search", ClassLimit::new(0, 60));
        let err = policy.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("search"));

        let policy = RateLimitPolicy::default().with_class("export", ClassLimit::new(10, 0));
        assert!(policy.validate().is_err());
    }
}
