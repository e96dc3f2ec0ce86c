use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry policy parameters for the fetch stage (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per fetch (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds before the retry (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_secs: 1.0,
            max_delay_secs: 10,
        }
    }
}

/// External extractor tool (yt-dlp compatible CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub program: String,
    /// Extra fixed arguments placed before the generated ones. Never derived from requests.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// External encoder tool (ffmpeg compatible CLI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub program: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

/// Global configuration loaded from `~/.config/mfetch/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool size; also the ceiling on simultaneous external processes.
    pub workers: usize,
    /// Bounded submission queue capacity (jobs waiting for a worker).
    pub queue_capacity: usize,
    /// Wall-clock limit for one extractor download run.
    pub fetch_timeout_secs: u64,
    /// Wall-clock limit for one encoder run.
    pub transcode_timeout_secs: u64,
    /// Wall-clock limit for the extractor metadata probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Largest artifact a single fetch may produce.
    pub max_artifact_bytes: u64,
    /// Ceiling on bytes held in the scratch root across all jobs.
    pub max_scratch_bytes: u64,
    /// If non-empty, only these hosts (and their subdomains) may be fetched.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    /// Hosts (and their subdomains) that are never fetched.
    #[serde(default)]
    pub denied_hosts: Vec<String>,
    /// Root for per-job scratch directories. Defaults to `<tmp>/mfetch`.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    /// How long terminal jobs and orphaned scratch dirs are kept before reaping.
    pub retention_secs: u64,
    /// Period of the background reaper.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Grace given to an in-flight process after its job is cancelled (0 = kill at once).
    #[serde(default)]
    pub cancel_grace_millis: u64,
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,
    #[serde(default)]
    pub encoder: Option<EncoderConfig>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Cookie jar files rotated across fetches when a site asks for login.
    #[serde(default)]
    pub cookie_jars: Vec<PathBuf>,
}

fn default_probe_timeout_secs() -> u64 {
    60
}

fn default_reap_interval_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 16,
            fetch_timeout_secs: 300,
            transcode_timeout_secs: 600,
            probe_timeout_secs: default_probe_timeout_secs(),
            max_artifact_bytes: 2 * 1024 * 1024 * 1024,
            max_scratch_bytes: 8 * 1024 * 1024 * 1024,
            allowed_hosts: Vec::new(),
            denied_hosts: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "0.0.0.0".to_string(),
                "::1".to_string(),
                "169.254.169.254".to_string(),
            ],
            scratch_root: None,
            retention_secs: 3600,
            reap_interval_secs: default_reap_interval_secs(),
            cancel_grace_millis: 0,
            extractor: None,
            encoder: None,
            retry: None,
            cookie_jars: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Reject settings that would stall the pipeline (zero workers, zero timeouts)
    /// or that no backoff can be computed from.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.fetch_timeout_secs == 0
            || self.transcode_timeout_secs == 0
            || self.probe_timeout_secs == 0
        {
            anyhow::bail!("stage timeouts must be non-zero");
        }
        if self.max_artifact_bytes == 0 {
            anyhow::bail!("max_artifact_bytes must be non-zero");
        }
        if self.max_scratch_bytes < self.max_artifact_bytes {
            anyhow::bail!("max_scratch_bytes must be at least max_artifact_bytes");
        }
        if let Some(retry) = &self.retry {
            if !retry.base_delay_secs.is_finite() || retry.base_delay_secs < 0.0 {
                anyhow::bail!(
                    "retry.base_delay_secs must be a finite, non-negative number (got {})",
                    retry.base_delay_secs
                );
            }
        }
        Ok(())
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("mfetch"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_millis)
    }

    pub fn extractor(&self) -> ExtractorConfig {
        self.extractor.clone().unwrap_or_default()
    }

    pub fn encoder(&self) -> EncoderConfig {
        self.encoder.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<PipelineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = PipelineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load and validate configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<PipelineConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: PipelineConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
