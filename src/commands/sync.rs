use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::error::Op;
use crate::sync::{SyncEngine, Target};
use crate::ui;

pub fn run(
    store: &ConfigStore,
    target: Option<&str>,
    yes: bool,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let target = Target::parse(Op::Sync, target)?;
    let engine = SyncEngine::new(store).with_cancel(cancel.clone());
    let plan = engine.plan_sync(&target)?;

    ui::header(&format!("Syncing '{}' configuration", target.name()));
    ui::info(&format!("From: {}", plan.source.display()));
    ui::info(&format!("To:   {}", plan.destination.display()));
    if plan.destination.exists() {
        ui::info(&format!(
            "The current {} will be archived first",
            plan.destination.display()
        ));
    }

    if dry_run {
        ui::dry_run_notice();
        return Ok(());
    }
    if !yes && !ui::confirm("Apply these files?")? {
        ui::skip("Sync cancelled");
        return Ok(());
    }

    let report = engine.apply(&plan)?;
    ui::success(&format!(
        "Synced {} files to {}",
        report.files.len(),
        report.plan.destination.display()
    ));
    println!(
        "  {}",
        format!("Archive: {}", report.archive.display()).dimmed()
    );
    Ok(())
}
