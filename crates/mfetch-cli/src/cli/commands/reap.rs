//! `mfetch reap` – remove scratch left behind by mfetch processes that have exited.

use anyhow::Result;
use mfetch_core::artifact::sweep_abandoned;
use mfetch_core::config::PipelineConfig;

pub async fn run_reap(cfg: &PipelineConfig) -> Result<()> {
    let root = cfg.scratch_root();
    // Namespaces of running schedulers stay locked and are skipped.
    let removed = sweep_abandoned(&root, cfg.retention()).await?;
    println!(
        "Removed {} stale scratch director{} under {}",
        removed,
        if removed == 1 { "y" } else { "ies" },
        root.display()
    );
    Ok(())
}
