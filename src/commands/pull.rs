use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::sync::{pull_warnings, SyncEngine, SETTINGS_TARGET};
use crate::ui;

pub async fn run(
    store: &ConfigStore,
    directory: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let directory = directory.unwrap_or(SETTINGS_TARGET);
    let settings = store.load()?;

    ui::header(&format!(
        "Pulling '{}' from {} ({})",
        directory, settings.github.config_repo, settings.github.branch
    ));
    for warning in pull_warnings(&settings) {
        ui::warn(&warning);
    }

    let engine = SyncEngine::new(store).with_cancel(cancel.clone());
    let report = engine.pull(directory).await?;

    ui::success(&format!(
        "Copied {} files to {}",
        report.files.len(),
        report.staged.display()
    ));
    for file in &report.files {
        println!("      {}", file.display().to_string().dimmed());
    }

    println!();
    println!("Next steps:");
    println!("  Review: anvil config show {}", report.directory);
    println!("  Apply:  anvil config sync {}", report.directory);
    Ok(())
}
