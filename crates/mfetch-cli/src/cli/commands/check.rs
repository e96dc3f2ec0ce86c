//! `mfetch check` – verify the external tools start.

use anyhow::{bail, Result};
use mfetch_core::config::PipelineConfig;
use mfetch_core::process::{Invocation, ProcessRunner};
use mfetch_core::SystemRunner;

pub async fn run_check(cfg: &PipelineConfig) -> Result<()> {
    let runner = SystemRunner::new();
    let dir = std::env::temp_dir();
    let tools = [
        ("extractor", cfg.extractor().program, "--version"),
        ("encoder", cfg.encoder().program, "-version"),
    ];

    let mut broken = 0;
    for (role, program, flag) in tools {
        let inv = Invocation::new(&program, &dir, cfg.probe_timeout()).arg(flag);
        match runner.run(&inv).await {
            Ok(res) if res.success() => {
                let version = res.stdout.lines().next().unwrap_or("").trim().to_string();
                println!("{:<10} ok      {} ({})", role, program, version);
            }
            Ok(res) => {
                broken += 1;
                let detail = if res.timed_out {
                    format!("{}: timed out", program)
                } else {
                    match res.check(&program) {
                        Err(failure) => failure.to_string(),
                        Ok(()) => format!("{}: did not finish", program),
                    }
                };
                println!("{:<10} FAILED  {}", role, detail);
            }
            Err(e) => {
                broken += 1;
                tracing::error!(alert = true, program = %program, "tool unusable: {}", e);
                println!("{:<10} MISSING {}", role, e);
            }
        }
    }

    if broken > 0 {
        bail!("{} tool(s) unusable", broken);
    }
    Ok(())
}
