//! CLI for the mfetch media job pipeline.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mfetch_core::config::{self, PipelineConfig};
use mfetch_core::OutputFormat;
use std::path::{Path, PathBuf};

use commands::{run_check, run_config_path, run_fetch, run_reap};

/// Top-level CLI for mfetch.
#[derive(Debug, Parser)]
#[command(name = "mfetch")]
#[command(about = "mfetch: fetch and transcode media with yt-dlp and ffmpeg", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URLs through the worker pool and copy the results out.
    Fetch {
        /// Page or media URLs (http/https).
        #[arg(required = true)]
        urls: Vec<String>,

        /// Output format: raw, audio, video-low, video-medium or video-high.
        #[arg(long, default_value = "raw")]
        format: OutputFormat,

        /// Directory the finished files are copied into (default: current dir).
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Override the configured worker count.
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Config file to use instead of the XDG default.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Remove scratch left by exited mfetch runs, once older than the retention period.
    Reap {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check that the extractor and encoder binaries can be run.
    Check {
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the location of the config file.
    ConfigPath,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Fetch {
                urls,
                format,
                out,
                workers,
                config,
            } => {
                let mut cfg = load_config(config.as_deref())?;
                if let Some(n) = workers {
                    cfg.workers = n;
                    cfg.validate()?;
                }
                let out_dir = match out {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                run_fetch(cfg, &urls, format, &out_dir).await?;
            }
            CliCommand::Reap { config } => run_reap(&load_config(config.as_deref())?).await?,
            CliCommand::Check { config } => run_check(&load_config(config.as_deref())?).await?,
            CliCommand::ConfigPath => run_config_path()?,
        }

        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let cfg = match path {
        Some(p) => config::load_from_path(p)
            .with_context(|| format!("loading config from {}", p.display()))?,
        None => config::load_or_init()?,
    };
    tracing::debug!("loaded config: {:?}", cfg);
    Ok(cfg)
}

#[cfg(test)]
mod tests;
