//! Map extractor stderr/stdout to a failure class.

/// What kind of failure the extractor reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Media does not exist, is private, or the URL is unsupported.
    NotFound,
    GeoBlocked,
    /// Site wants a session; try the next cookie jar.
    LoginRequired,
    /// Remote size is over the configured ceiling.
    SizeExceeded,
    /// Network hiccup worth one more attempt.
    Transient,
    /// Outbound network is blocked for this host (DNS refuses the name).
    NetworkBlocked,
    /// Anything else; not retried.
    Other,
}

const SIZE_EXCEEDED: &[&str] = &["larger than max-filesize"];

const NOT_FOUND: &[&str] = &[
    "http error 404",
    "video unavailable",
    "unsupported url",
    "does not exist",
    "this video is private",
];

const GEO_BLOCKED: &[&str] = &[
    "not available in your country",
    "geo restriction",
    "geo-restricted",
];

const LOGIN_REQUIRED: &[&str] = &[
    "login required",
    "sign in to confirm",
    "rate-limit reached or login",
];

const NETWORK_BLOCKED: &[&str] = &["no address associated with hostname"];

const TRANSIENT: &[&str] = &[
    "timed out",
    "connection reset",
    "temporary failure in name resolution",
    "connection refused",
    "http error 429",
    "incompleteread",
];

/// Classify a failed extractor run from its output.
pub fn classify_extractor_output(stderr: &str, stdout: &str) -> FailureClass {
    let text = format!("{}\n{}", stderr, stdout).to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(SIZE_EXCEEDED) {
        FailureClass::SizeExceeded
    } else if has(NOT_FOUND) {
        FailureClass::NotFound
    } else if has(GEO_BLOCKED) {
        FailureClass::GeoBlocked
    } else if has(LOGIN_REQUIRED) {
        FailureClass::LoginRequired
    } else if has(NETWORK_BLOCKED) {
        FailureClass::NetworkBlocked
    } else if has(TRANSIENT) || has_server_error(&text) {
        FailureClass::Transient
    } else {
        FailureClass::Other
    }
}

/// "HTTP Error 5xx" for any three-digit 5xx status.
fn has_server_error(text: &str) -> bool {
    text.match_indices("http error 5").any(|(i, m)| {
        let rest = &text.as_bytes()[i + m.len()..];
        rest.len() >= 2 && rest[0].is_ascii_digit() && rest[1].is_ascii_digit()
    })
}
