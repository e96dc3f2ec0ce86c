//! Request-side value types: job identifiers, output formats, and the immutable request.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::policy::ValidationError;

/// Longest caller-supplied job identifier accepted (ids name scratch directories).
const MAX_ID_LEN: usize = 64;

/// Length of generated identifiers (hex chars of a v4 UUID).
const GENERATED_ID_LEN: usize = 12;

/// Opaque job identifier. Restricted to `[A-Za-z0-9_-]` so it is always a safe
/// single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        let mut s = uuid::Uuid::new_v4().simple().to_string();
        s.truncate(GENERATED_ID_LEN);
        JobId(s)
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let ok = !s.is_empty()
            && s.len() <= MAX_ID_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if ok {
            Ok(JobId(s.to_string()))
        } else {
            Err(ValidationError::InvalidJobId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target video quality; each maps to a fixed encoder profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoQuality {
    Low,
    Medium,
    High,
}

impl VideoQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoQuality::Low => "low",
            VideoQuality::Medium => "medium",
            VideoQuality::High => "high",
        }
    }
}

/// Requested output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Deliver whatever the extractor produced; no transcode.
    Raw,
    /// Audio-only extraction.
    Audio,
    /// Video re-encode at the given quality.
    Video(VideoQuality),
}

impl OutputFormat {
    pub fn needs_transcode(self) -> bool {
        !matches!(self, OutputFormat::Raw)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Raw => f.write_str("raw"),
            OutputFormat::Audio => f.write_str("audio"),
            OutputFormat::Video(q) => write!(f, "video-{}", q.as_str()),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(OutputFormat::Raw),
            "audio" => Ok(OutputFormat::Audio),
            "video" | "video-medium" => Ok(OutputFormat::Video(VideoQuality::Medium)),
            "video-low" => Ok(OutputFormat::Video(VideoQuality::Low)),
            "video-high" => Ok(OutputFormat::Video(VideoQuality::High)),
            _ => Err(ValidationError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A single fetch request. Immutable once created.
#[derive(Debug, Clone)]
pub struct JobRequest {
    id: JobId,
    url: String,
    format: OutputFormat,
    submitted_at: SystemTime,
}

impl JobRequest {
    /// New request with a generated identifier.
    pub fn new(url: impl Into<String>, format: OutputFormat) -> Self {
        Self::with_id(JobId::generate(), url, format)
    }

    /// New request with a caller-supplied identifier (e.g. the chat message id).
    pub fn with_id(id: JobId, url: impl Into<String>, format: OutputFormat) -> Self {
        Self {
            id,
            url: url.into(),
            format,
            submitted_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn submitted_at(&self) -> SystemTime {
        self.submitted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_path_safe_and_distinct() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_eq!(a.as_str().len(), GENERATED_ID_LEN);
        assert_ne!(a, b);
        assert!(JobId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn job_id_rejects_path_components() {
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse(&"x".repeat(65)).is_err());
        assert!(JobId::parse("chat-42_msg-7").is_ok());
    }

    #[test]
    fn output_format_parses_known_names() {
        assert_eq!("raw".parse::<OutputFormat>().unwrap(), OutputFormat::Raw);
        assert_eq!("Audio".parse::<OutputFormat>().unwrap(), OutputFormat::Audio);
        assert_eq!(
            "video-high".parse::<OutputFormat>().unwrap(),
            OutputFormat::Video(VideoQuality::High)
        );
        assert_eq!(
            "video".parse::<OutputFormat>().unwrap(),
            OutputFormat::Video(VideoQuality::Medium)
        );
        assert!(matches!(
            "video-8k".parse::<OutputFormat>(),
            Err(ValidationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn output_format_display_matches_parse() {
        for f in [
            OutputFormat::Raw,
            OutputFormat::Audio,
            OutputFormat::Video(VideoQuality::Low),
            OutputFormat::Video(VideoQuality::High),
        ] {
            assert_eq!(f.to_string().parse::<OutputFormat>().unwrap(), f);
        }
    }
}
