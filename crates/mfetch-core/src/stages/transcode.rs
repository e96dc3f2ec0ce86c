use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::encoder::EncodeProfile;
use super::error::{TranscodeError, TranscodeFailure};
use super::StageContext;
use crate::artifact::{Artifact, ArtifactStore};
use crate::config::{EncoderConfig, PipelineConfig};
use crate::job::OutputFormat;
use crate::process::{Invocation, ProcessRunner};

/// Re-encodes a raw artifact into the requested format.
pub struct Transcoder {
    runner: Arc<dyn ProcessRunner>,
    store: Arc<ArtifactStore>,
    encoder: EncoderConfig,
    timeout: Duration,
    cancel_grace: Duration,
}

impl Transcoder {
    pub fn new(config: &PipelineConfig, runner: Arc<dyn ProcessRunner>, store: Arc<ArtifactStore>) -> Self {
        Self {
            runner,
            store,
            encoder: config.encoder(),
            timeout: config.transcode_timeout(),
            cancel_grace: config.cancel_grace(),
        }
    }

    /// Pass-through for `raw`. On success the raw artifact is deleted; on
    /// failure it is handed back untouched inside [`TranscodeFailure`].
    pub async fn transcode(
        &self,
        raw: Artifact,
        format: OutputFormat,
        ctx: &StageContext,
    ) -> Result<Artifact, TranscodeFailure> {
        let Some(profile) = EncodeProfile::for_format(format) else {
            return Ok(raw);
        };
        match self.encode(&raw, &profile, ctx).await {
            Ok(output) => {
                let raw_path = raw.path().to_path_buf();
                if let Err(e) = self.store.discard(raw).await {
                    warn!(job_id = %ctx.job_id(), path = %raw_path.display(), "could not discard raw artifact: {}", e);
                }
                Ok(output)
            }
            Err(error) => {
                let output = ctx.scratch.join(profile.output_name);
                if let Err(e) = tokio::fs::remove_file(&output).await {
                    debug!(path = %output.display(), "no partial encoder output: {}", e);
                }
                Err(TranscodeFailure { raw, error })
            }
        }
    }

    async fn encode(
        &self,
        raw: &Artifact,
        profile: &EncodeProfile,
        ctx: &StageContext,
    ) -> Result<Artifact, TranscodeError> {
        if ctx.cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        let cmd = profile.command(raw.path(), ctx.scratch.path());
        let inv = Invocation::new(&self.encoder.program, ctx.scratch.path(), self.timeout)
            .args(cmd.build_args())
            .with_cancel(ctx.cancel.clone(), self.cancel_grace);
        info!(job_id = %ctx.job_id(), stage = "transcode", output = profile.output_name, "transcode starting");

        let res = self.runner.run(&inv).await?;
        if res.cancelled {
            return Err(TranscodeError::Cancelled);
        }
        if res.timed_out {
            return Err(TranscodeError::Timeout);
        }
        res.check(&self.encoder.program).map_err(TranscodeError::Tool)?;

        let output = ctx.scratch.join(profile.output_name);
        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(TranscodeError::EmptyOutput),
        }
        let artifact = self.store.adopt(&ctx.scratch, output).await?;
        info!(
            job_id = %ctx.job_id(),
            stage = "transcode",
            bytes = artifact.size(),
            elapsed_ms = res.duration.as_millis() as u64,
            "transcode complete"
        );
        Ok(artifact)
    }
}
