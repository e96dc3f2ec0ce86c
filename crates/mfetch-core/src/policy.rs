//! URL admission policy.
//!
//! Runs before anything is queued: the extractor may follow redirects or load
//! plugins, so a blocked host has to be rejected before any process starts.

use std::fmt;

/// Request rejected before any external process started. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported URL scheme {0:?} (only http and https)")]
    UnsupportedScheme(String),
    #[error("URL has no host: {0}")]
    MissingHost(String),
    #[error("host {0} is denied")]
    HostDenied(String),
    #[error("host {0} is not in the allow list")]
    HostNotAllowed(String),
    #[error("unsupported output format {0:?}")]
    UnsupportedFormat(String),
    #[error("invalid job id {0:?}")]
    InvalidJobId(String),
}

/// Host allow/deny lists. Entries match the host itself and any subdomain.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    allowed: Vec<String>,
    denied: Vec<String>,
}

impl UrlPolicy {
    pub fn new(allowed: &[String], denied: &[String]) -> Self {
        Self {
            allowed: allowed.iter().map(|h| normalize_host(h)).collect(),
            denied: denied.iter().map(|h| normalize_host(h)).collect(),
        }
    }

    /// Parses `raw` and checks scheme and host. Deny wins over allow.
    pub fn validate(&self, raw: &str) -> Result<url::Url, ValidationError> {
        let parsed = url::Url::parse(raw.trim()).map_err(|e| ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(normalize_host)
            .ok_or_else(|| ValidationError::MissingHost(raw.to_string()))?;

        if self.denied.iter().any(|d| host_matches(&host, d)) {
            return Err(ValidationError::HostDenied(host));
        }
        if !self.allowed.is_empty() && !self.allowed.iter().any(|a| host_matches(&host, a)) {
            return Err(ValidationError::HostNotAllowed(host));
        }
        Ok(parsed)
    }
}

impl fmt::Display for UrlPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allow={:?} deny={:?}", self.allowed, self.denied)
    }
}

/// Lowercase, strip IPv6 brackets and a trailing dot.
fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern
        || (host.len() > pattern.len()
            && host.ends_with(pattern)
            && host.as_bytes()[host.len() - pattern.len() - 1] == b'.')
}
