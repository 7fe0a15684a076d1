//! Stateless threat detectors.
//!
//! Each family is an independent list of patterns run against the request's
//! scan surface: query and form parameters, the raw body, and the
//! `User-Agent`, `Referer` and `X-Forwarded-For` headers, all lower-cased.
//! A family reports at most one issue per request (its first match).
//!
//! | family              | severity | blocks |
//! |---------------------|----------|--------|
//! | `sql_injection`     | high     | yes    |
//! | `path_traversal`    | high     | yes    |
//! | `command_injection` | high     | yes    |
//! | `xss`               | medium   | no     |
//! | `suspicious_headers`| low      | no     |
//!
//! These are heuristics, not a rule engine: false positives on unusual but
//! legitimate input are possible and only high severities block.

use ipnetwork::IpNetwork;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::request::RequestContext;

/// Headers that are part of the scan surface.
const SCANNED_HEADERS: [&str; 3] = ["user-agent", "referer", "x-forwarded-for"];

/// Matched fragments longer than this are truncated in issue details.
const MAX_DETAIL_LEN: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    SqlInjection,
    PathTraversal,
    CommandInjection,
    Xss,
    SuspiciousHeaders,
}

impl ThreatKind {
    pub fn severity(self) -> Severity {
        match self {
            Self::SqlInjection | Self::PathTraversal | Self::CommandInjection => Severity::High,
            Self::Xss => Severity::Medium,
            Self::SuspiciousHeaders => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::PathTraversal => "path_traversal",
            Self::CommandInjection => "command_injection",
            Self::Xss => "xss",
            Self::SuspiciousHeaders => "suspicious_headers",
        }
    }
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatIssue {
    pub kind: ThreatKind,
    pub severity: Severity,
    /// The fragment that matched.
    pub detail: String,
}

impl ThreatIssue {
    fn new(kind: ThreatKind, detail: &str) -> Self {
        let detail = match detail.char_indices().nth(MAX_DETAIL_LEN) {
            Some((cut, _)) => format!("{}...", &detail[..cut]),
            None => detail.to_string(),
        };
        Self {
            kind,
            severity: kind.severity(),
            detail,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::High
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid threat pattern"))
        .collect()
}

static SQL_INJECTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bunion\b[\s(]+(?:all\s+)?select\b",
        r"['`]\s*(?:or|and)\s+['`]?\w+['`]?\s*(?:=|like)\s*['`]?\w+",
        r"['`]\s*;\s*(?:drop|delete|insert|update|truncate|alter|exec)\b",
        r"\b(?:drop|truncate|alter)\s+table\b",
        r"\binsert\s+into\b[\s\S]*\bvalues\b",
        r"\bdelete\s+from\b",
        r"\bselect\b[\s\S]+\bfrom\b[\s\S]+\bwhere\b",
        r"\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
        r"\bexec(?:ute)?\s+(?:xp|sp)_\w+",
        r"(?:'|\))\s*(?:--|#|/\*)",
    ])
});

static PATH_TRAVERSAL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\.\.[/\\]",
        r"%2e%2e(?:%2f|%5c|/|\\)",
        r"\.\.(?:%2f|%5c)",
        r"%252e%252e",
        r"/etc/(?:passwd|shadow|hosts)\b",
        r"c:\\windows\\",
    ])
});

static COMMAND_INJECTION: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?:;|&&|\|\|?)\s*(?:cat|ls|id|whoami|uname|wget|curl|nc|netcat|bash|sh|rm|chmod|python\d?|perl|ping|powershell)\b",
        r"\$\([^)]*\)",
        r"`[^`]+`",
        r"(?:/bin/(?:ba)?sh|cmd\.exe|/dev/tcp/)",
    ])
});

static XSS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"<\s*script\b",
        r"javascript\s*:",
        r"\bon(?:load|error|click|mouseover|focus|blur|submit|change)\s*=",
        r"<\s*iframe\b",
        r"<\s*(?:object|embed|svg)\b",
        r"document\.(?:cookie|location|write)",
    ])
});

static SCANNER_USER_AGENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"sqlmap|nikto|nmap|masscan|zgrab|dirbuster|gobuster|wpscan|acunetix|nessus|openvas|nuclei|curl|wget|python-requests|go-http-client|libwww-perl|scrapy|crawler|spider|bot\b",
    )
    .expect("Invalid user agent regex")
});

/// Address ranges a client has no business putting in `X-Forwarded-For`.
static PRIVATE_NETWORKS: LazyLock<Vec<IpNetwork>> = LazyLock::new(|| {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "0.0.0.0/8",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse::<IpNetwork>().ok())
    .collect()
});

/// Whether `user_agent` looks like a scanner, a script or a bot. A missing
/// user agent counts as suspicious.
pub fn is_suspicious_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.trim();
    ua.is_empty() || SCANNER_USER_AGENT.is_match(&ua.to_lowercase())
}

/// First private or loopback address claimed in an `X-Forwarded-For` value.
pub fn forged_forwarded_for(value: &str) -> Option<IpAddr> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse::<IpAddr>().ok())
        .find(|ip| PRIVATE_NETWORKS.iter().any(|net| net.contains(*ip)))
}

/// Runs every detector family over a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreatScanner;

impl ThreatScanner {
    pub fn new() -> Self {
        Self
    }

    /// All issues found in `request`, in family order.
    pub fn scan(&self, request: &RequestContext) -> Vec<ThreatIssue> {
        let surface = scan_surface(request);
        let mut issues = Vec::new();

        for (kind, patterns) in [
            (ThreatKind::SqlInjection, &*SQL_INJECTION),
            (ThreatKind::PathTraversal, &*PATH_TRAVERSAL),
            (ThreatKind::CommandInjection, &*COMMAND_INJECTION),
            (ThreatKind::Xss, &*XSS),
        ] {
            if let Some(found) = patterns.iter().find_map(|re| re.find(&surface)) {
                issues.push(ThreatIssue::new(kind, found.as_str()));
            }
        }

        if let Some(issue) = suspicious_headers(request) {
            issues.push(issue);
        }
        issues
    }

    /// Scan only a single string (used for ad-hoc checks of one value).
    pub fn scan_text(&self, text: &str) -> Vec<ThreatIssue> {
        let lowered = text.to_lowercase();
        [
            (ThreatKind::SqlInjection, &*SQL_INJECTION),
            (ThreatKind::PathTraversal, &*PATH_TRAVERSAL),
            (ThreatKind::CommandInjection, &*COMMAND_INJECTION),
            (ThreatKind::Xss, &*XSS),
        ]
        .into_iter()
        .filter_map(|(kind, patterns)| {
            patterns
                .iter()
                .find_map(|re| re.find(&lowered))
                .map(|m| ThreatIssue::new(kind, m.as_str()))
        })
        .collect()
    }
}

/// Whether any issue is severe enough to reject the request.
pub fn has_blocking_issue(issues: &[ThreatIssue]) -> bool {
    issues.iter().any(ThreatIssue::is_blocking)
}

/// Decoded query pairs plus the raw query string, so both plain payloads and
/// still-encoded sequences (`%2e%2e/`) are visible to the patterns.
fn scan_surface(request: &RequestContext) -> String {
    let mut parts: Vec<Cow<'_, str>> = Vec::new();
    for (name, value) in request.query_pairs() {
        parts.push(name);
        parts.push(value);
    }
    parts.extend(request.raw_query().map(Cow::Borrowed));
    for (name, value) in &request.form {
        parts.push(Cow::Borrowed(name));
        parts.push(Cow::Borrowed(value));
    }
    parts.push(Cow::Borrowed(&request.body));
    parts.extend(
        SCANNED_HEADERS
            .iter()
            .filter_map(|h| request.header(h))
            .map(Cow::Borrowed),
    );
    parts.join("\n").to_lowercase()
}

fn suspicious_headers(request: &RequestContext) -> Option<ThreatIssue> {
    let user_agent = request.user_agent();
    if is_suspicious_user_agent(user_agent) {
        let detail = if user_agent.trim().is_empty() {
            "missing user-agent".to_string()
        } else {
            format!("user-agent: {user_agent}")
        };
        return Some(ThreatIssue::new(ThreatKind::SuspiciousHeaders, &detail));
    }
    let forwarded = request.header("x-forwarded-for")?;
    forged_forwarded_for(forwarded).map(|ip| {
        ThreatIssue::new(
            ThreatKind::SuspiciousHeaders,
            &format!("private address in x-forwarded-for: {ip}"),
        )
    })
}
