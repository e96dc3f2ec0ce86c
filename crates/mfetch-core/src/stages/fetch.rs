use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::FetchError;
use super::extractor::{is_media_file, output_template, ExtractorCommand, MediaInfo, COOKIE_FILE};
use super::StageContext;
use crate::artifact::{Artifact, ArtifactStore, StoreError};
use crate::config::{ExtractorConfig, PipelineConfig};
use crate::job::OutputFormat;
use crate::policy::UrlPolicy;
use crate::process::{last_lines, Invocation, ProcessResult, ProcessRunner, ToolFailure};
use crate::retry::{classify_extractor_output, run_with_retry, FailureClass, RetryPolicy};

/// Raw artifact plus whatever the metadata probe reported.
#[derive(Debug)]
pub struct FetchOutput {
    pub artifact: Artifact,
    pub info: Option<MediaInfo>,
}

/// Runs the extractor: validate, probe, download, verify, adopt.
pub struct Fetcher {
    runner: Arc<dyn ProcessRunner>,
    store: Arc<ArtifactStore>,
    policy: UrlPolicy,
    extractor: ExtractorConfig,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    probe_timeout: Duration,
    cancel_grace: Duration,
    max_artifact_bytes: u64,
    cookie_jars: Vec<PathBuf>,
    next_jar: AtomicUsize,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig, runner: Arc<dyn ProcessRunner>, store: Arc<ArtifactStore>) -> Self {
        Self {
            runner,
            store,
            policy: UrlPolicy::new(&config.allowed_hosts, &config.denied_hosts),
            extractor: config.extractor(),
            retry: RetryPolicy::from(&config.retry()),
            fetch_timeout: config.fetch_timeout(),
            probe_timeout: config.probe_timeout(),
            cancel_grace: config.cancel_grace(),
            max_artifact_bytes: config.max_artifact_bytes,
            cookie_jars: config.cookie_jars.clone(),
            next_jar: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> &UrlPolicy {
        &self.policy
    }

    /// Fetches `url` into the job scratch dir. The URL is validated again
    /// here so no extractor run can start for a blocked host.
    pub async fn fetch(
        &self,
        url: &str,
        format: OutputFormat,
        ctx: &StageContext,
    ) -> Result<FetchOutput, FetchError> {
        let url = self.policy.validate(url)?;
        self.store.ensure_headroom()?;

        let first_jar = if self.cookie_jars.is_empty() {
            0
        } else {
            self.next_jar.fetch_add(1, Ordering::Relaxed) % self.cookie_jars.len()
        };

        info!(job_id = %ctx.job_id(), stage = "fetch", url = %url, format = %format, "fetch starting");
        run_with_retry(&self.retry, &ctx.cancel, |attempt| {
            self.attempt_with_jars(url.as_str(), format, ctx, first_jar, attempt)
        })
        .await
    }

    /// One retry attempt. Rotates through cookie jars on `LoginRequired`
    /// without consuming the retry budget.
    async fn attempt_with_jars(
        &self,
        url: &str,
        format: OutputFormat,
        ctx: &StageContext,
        first_jar: usize,
        attempt: u32,
    ) -> Result<FetchOutput, FetchError> {
        if self.cookie_jars.is_empty() {
            return self.attempt(url, format, ctx, None, attempt).await;
        }
        let n = self.cookie_jars.len();
        let mut last = FetchError::Cancelled;
        for i in 0..n {
            let jar = &self.cookie_jars[(first_jar + i) % n];
            match self.attempt(url, format, ctx, Some(jar), attempt).await {
                Err(FetchError::LoginRequired(msg)) => {
                    info!(job_id = %ctx.job_id(), jar = %jar.display(), "login required, rotating cookie jar");
                    last = FetchError::LoginRequired(msg);
                }
                other => return other,
            }
        }
        Err(last)
    }

    async fn attempt(
        &self,
        url: &str,
        format: OutputFormat,
        ctx: &StageContext,
        jar: Option<&Path>,
        attempt: u32,
    ) -> Result<FetchOutput, FetchError> {
        clear_partials(ctx.scratch.path()).await;
        let cookies = match jar {
            Some(jar) => Some(self.install_cookies(jar, ctx).await?),
            None => None,
        };
        let res = self.probe_and_download(url, format, ctx, cookies.as_deref(), attempt).await;
        if let Some(path) = cookies {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), "cookie copy already gone: {}", e);
            }
        }
        res
    }

    async fn probe_and_download(
        &self,
        url: &str,
        format: OutputFormat,
        ctx: &StageContext,
        cookies: Option<&Path>,
        attempt: u32,
    ) -> Result<FetchOutput, FetchError> {
        let info = self.probe(url, ctx, cookies).await?;
        if let Some(reported) = info.reported_size() {
            if reported > self.max_artifact_bytes {
                return Err(FetchError::SizeExceeded {
                    limit: self.max_artifact_bytes,
                    reported: Some(reported),
                });
            }
        }

        let mut cmd = ExtractorCommand::new(url)
            .extra_args(&self.extractor.extra_args)
            .format_selector(format)
            .output_template(&output_template(ctx.scratch.path()))
            .max_filesize(self.max_artifact_bytes);
        if let Some(c) = cookies {
            cmd = cmd.cookies(c);
        }
        let res = self.run(cmd, self.fetch_timeout, ctx).await?;
        self.check(&res)?;

        let Some(path) = find_media(ctx.scratch.path()).await? else {
            // Some extractors exit 0 after refusing (e.g. over max-filesize).
            let class = classify_extractor_output(&res.stderr_tail, &res.stdout);
            return Err(match class {
                FailureClass::Other => FetchError::EmptyOutput,
                class => FetchError::from_class(class, tool_failure(&self.extractor.program, &res), self.max_artifact_bytes),
            });
        };

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StoreError::io(&path, &e))?
            .len();
        if size == 0 {
            return Err(FetchError::EmptyOutput);
        }
        if size > self.max_artifact_bytes {
            return Err(FetchError::SizeExceeded {
                limit: self.max_artifact_bytes,
                reported: Some(size),
            });
        }

        let artifact = self.store.adopt(&ctx.scratch, path).await?;
        info!(
            job_id = %ctx.job_id(),
            stage = "fetch",
            attempt,
            bytes = artifact.size(),
            elapsed_ms = res.duration.as_millis() as u64,
            "fetch complete"
        );
        Ok(FetchOutput {
            artifact,
            info: Some(info),
        })
    }

    async fn probe(
        &self,
        url: &str,
        ctx: &StageContext,
        cookies: Option<&Path>,
    ) -> Result<MediaInfo, FetchError> {
        let mut cmd = ExtractorCommand::new(url)
            .extra_args(&self.extractor.extra_args)
            .dump_json();
        if let Some(c) = cookies {
            cmd = cmd.cookies(c);
        }
        let res = self.run(cmd, self.probe_timeout, ctx).await?;
        self.check(&res)?;
        MediaInfo::parse(&res.stdout).map_err(|e| FetchError::Metadata(e.to_string()))
    }

    async fn run(
        &self,
        cmd: ExtractorCommand,
        timeout: Duration,
        ctx: &StageContext,
    ) -> Result<ProcessResult, FetchError> {
        let inv = Invocation::new(&self.extractor.program, ctx.scratch.path(), timeout)
            .args(cmd.build_args())
            .with_cancel(ctx.cancel.clone(), self.cancel_grace);
        Ok(self.runner.run(&inv).await?)
    }

    /// Maps a finished run to cancel/timeout/classified failure.
    fn check(&self, res: &ProcessResult) -> Result<(), FetchError> {
        if res.cancelled {
            return Err(FetchError::Cancelled);
        }
        if res.timed_out {
            return Err(FetchError::Timeout);
        }
        if let Err(failure) = res.check(&self.extractor.program) {
            let class = classify_extractor_output(&res.stderr_tail, &res.stdout);
            warn!(program = %failure.program, exit_code = ?failure.exit_code, class = ?class, "extractor failed");
            return Err(FetchError::from_class(class, failure, self.max_artifact_bytes));
        }
        Ok(())
    }

    async fn install_cookies(&self, jar: &Path, ctx: &StageContext) -> Result<PathBuf, FetchError> {
        let dest = ctx.scratch.join(COOKIE_FILE);
        tokio::fs::copy(jar, &dest)
            .await
            .map_err(|e| StoreError::io(jar, &e))?;
        Ok(dest)
    }
}

fn tool_failure(program: &str, res: &ProcessResult) -> ToolFailure {
    ToolFailure {
        program: program.to_string(),
        exit_code: res.exit_code,
        stderr_tail: last_lines(&res.stderr_tail, 5),
    }
}

/// First finished `media.*` file in the scratch dir.
async fn find_media(dir: &Path) -> Result<Option<PathBuf>, StoreError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::io(dir, &e))?;
    let mut found: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(dir, &e))?
    {
        if is_media_file(&entry.file_name().to_string_lossy()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

/// Removes leftovers of a previous attempt so they are never mistaken for output.
async fn clear_partials(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with("media.") {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                debug!(file = %name, "could not remove partial: {}", e);
            }
        }
    }
}
