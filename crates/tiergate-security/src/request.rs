//! Transport-neutral view of an incoming request.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::policy::DEFAULT_CLASS;

/// Identifier used for requests that arrive without a client address.
pub const UNKNOWN_IP: &str = "unknown";

/// What the admission layer needs to know about a request.
///
/// Header names are stored lower-cased. The HTTP layer builds one of these
/// per request and hands it to [`SecurityGate::evaluate`](crate::SecurityGate::evaluate).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: String,
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: String,
    /// Rate-limit class of the endpoint (`search`, `export`, ...).
    pub class: String,
}

impl RequestContext {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            method: "GET".to_string(),
            uri: "/".to_string(),
            class: DEFAULT_CLASS.to_string(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.with_header("user-agent", user_agent)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    /// Client identifier for windows and the blacklist.
    pub fn client_ip(&self) -> &str {
        let ip = self.ip.trim();
        if ip.is_empty() { UNKNOWN_IP } else { ip }
    }

    /// Raw query string of the URI, if any.
    pub fn raw_query(&self) -> Option<&str> {
        self.uri
            .split_once('?')
            .map(|(_, qs)| qs.split_once('#').map_or(qs, |(qs, _)| qs))
            .filter(|qs| !qs.is_empty())
    }

    /// Query parameters from the URI's query string followed by the explicit
    /// `query` pairs. URI pairs are form-urlencoded decoded (`%XX` and `+`).
    pub fn query_pairs(&self) -> Vec<(Cow<'_, str>, Cow<'_, str>)> {
        let from_uri = self
            .raw_query()
            .map(|qs| form_urlencoded::parse(qs.as_bytes()))
            .into_iter()
            .flatten();
        from_uri
            .chain(
                self.query
                    .iter()
                    .map(|(k, v)| (Cow::Borrowed(k.as_str()), Cow::Borrowed(v.as_str()))),
            )
            .collect()
    }
}
