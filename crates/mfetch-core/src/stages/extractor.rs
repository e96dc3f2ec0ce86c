//! Extractor (yt-dlp compatible) command builder.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::job::OutputFormat;

/// File name stem every download is written under, so the result can be found
/// regardless of the container the extractor picks.
pub const MEDIA_STEM: &str = "media";

/// Cookie jar copy inside the scratch dir (the extractor writes cookies back).
pub const COOKIE_FILE: &str = "cookies.txt";

/// Longest caption kept from the media description.
pub const CAPTION_LIMIT: usize = 1024;

/// Builder for extractor invocations. The URL is always the final argument,
/// after `--`, so it can never be read as an option.
#[derive(Debug, Clone)]
pub struct ExtractorCommand {
    url: String,
    extra_args: Vec<String>,
    args: Vec<OsString>,
}

impl ExtractorCommand {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra_args: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Fixed arguments from configuration.
    pub fn extra_args(mut self, extra: &[String]) -> Self {
        self.extra_args.extend(extra.iter().cloned());
        self
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Print metadata as JSON instead of downloading.
    pub fn dump_json(self) -> Self {
        self.arg("--dump-json").arg("--skip-download")
    }

    pub fn format_selector(self, format: OutputFormat) -> Self {
        self.arg("-f").arg(format_selector(format))
    }

    pub fn output_template(self, path: &Path) -> Self {
        self.arg("-o").arg(path.as_os_str().to_os_string())
    }

    pub fn max_filesize(self, bytes: u64) -> Self {
        self.arg("--max-filesize").arg(bytes.to_string())
    }

    pub fn cookies(self, path: &Path) -> Self {
        self.arg("--cookies").arg(path.as_os_str().to_os_string())
    }

    pub fn build_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--no-playlist".into(), "--no-progress".into()];
        args.extend(self.extra_args.iter().map(OsString::from));
        args.extend(self.args.iter().cloned());
        args.push("--".into());
        args.push(self.url.clone().into());
        args
    }
}

/// Format selector per requested output. Audio jobs skip the video stream.
pub fn format_selector(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Audio => "ba/b",
        OutputFormat::Raw | OutputFormat::Video(_) => "bv*+ba/b",
    }
}

/// Output template inside the job scratch dir.
pub fn output_template(scratch: &Path) -> PathBuf {
    scratch.join(format!("{}.%(ext)s", MEDIA_STEM))
}

/// True for a finished download written from [`output_template`].
pub fn is_media_file(name: &str) -> bool {
    name.starts_with(&format!("{}.", MEDIA_STEM))
        && !name.ends_with(".part")
        && !name.ends_with(".ytdl")
        && !name.contains(".part-Frag")
        && !name.ends_with(".temp")
}

/// Subset of the extractor's `--dump-json` output the pipeline uses.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub description: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<f64>,
    pub duration: Option<f64>,
    pub extractor: Option<String>,
}

impl MediaInfo {
    /// Parses the first JSON object the extractor printed.
    pub fn parse(stdout: &str) -> Result<Self, serde_json::Error> {
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .unwrap_or("");
        serde_json::from_str(line)
    }

    /// Exact size if known, else the approximate one.
    pub fn reported_size(&self) -> Option<u64> {
        self.filesize
            .or_else(|| self.filesize_approx.filter(|s| *s >= 0.0).map(|s| s as u64))
    }

    /// Description trimmed to [`CAPTION_LIMIT`] characters.
    pub fn caption(&self) -> Option<String> {
        self.description
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| d.chars().take(CAPTION_LIMIT).collect())
    }
}
