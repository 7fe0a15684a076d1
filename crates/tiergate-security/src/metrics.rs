//! Admission metrics, recorded through the `metrics` facade.

use metrics::counter;

pub mod names {
    pub const ADMISSION_DECISIONS_TOTAL: &str = "admission_decisions_total";
    pub const RATE_LIMIT_CHECKS_TOTAL: &str = "rate_limit_checks_total";
    pub const THREATS_DETECTED_TOTAL: &str = "threats_detected_total";
    pub const BLACKLIST_ADDITIONS_TOTAL: &str = "blacklist_additions_total";
    pub const SUSPICIOUS_ACTIVITY_TOTAL: &str = "suspicious_activity_total";
}

pub fn record_decision(reason: &'static str) {
    counter!(names::ADMISSION_DECISIONS_TOTAL, "reason" => reason).increment(1);
}

pub fn record_limit_check(allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    counter!(names::RATE_LIMIT_CHECKS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_threat(kind: &'static str) {
    counter!(names::THREATS_DETECTED_TOTAL, "kind" => kind).increment(1);
}

pub fn record_blacklist_addition() {
    counter!(names::BLACKLIST_ADDITIONS_TOTAL).increment(1);
}

pub fn record_suspicious_activity(reason: &'static str) {
    counter!(names::SUSPICIOUS_ACTIVITY_TOTAL, "reason" => reason).increment(1);
}
