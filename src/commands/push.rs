use anyhow::Result;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::error::Op;
use crate::sync::{PushOutcome, SyncEngine, Target};
use crate::ui;

pub async fn run(store: &ConfigStore, target: Option<&str>, cancel: &CancellationToken) -> Result<()> {
    let target = Target::parse(Op::Push, target)?;
    let settings = store.load()?;
    let engine = SyncEngine::new(store).with_cancel(cancel.clone());
    let (source, dest) = engine.push_source(&target)?;

    ui::header(&format!("Pushing '{}' configuration", target.name()));
    ui::info(&format!("Repository: {}", settings.github.config_repo));
    ui::info(&format!("Branch:     {}", settings.github.branch));
    ui::info(&format!("Source:     {} -> {}", source.display(), dest));
    println!();

    let report = match engine.push(&target).await? {
        PushOutcome::UpToDate => {
            ui::success("Configuration is up-to-date");
            return Ok(());
        }
        PushOutcome::Pushed(report) => report,
    };

    if report.new_app {
        ui::info(&format!("New app directory '{}' added to the repository", report.target));
    }
    println!("{}", "Changes:".bold());
    for line in report.diff.stat.lines() {
        println!("  {}", line);
    }
    if let Some(diff) = &report.diff.full_diff {
        println!();
        for line in diff.lines() {
            let line = match line.chars().next() {
                Some('+') if !line.starts_with("+++") => line.green(),
                Some('-') if !line.starts_with("---") => line.red(),
                _ => line.normal(),
            };
            println!("  {}", line);
        }
    }
    println!();

    ui::success(&format!("Created branch {}", report.branch.bold()));
    ui::success(&format!("Committed: {}", report.commit_message));
    for file in &report.files {
        println!("      {}", file.dimmed());
    }
    ui::success(&format!("Pushed to {}", report.repository_url));
    if !report.remote_output.is_empty() {
        for line in report.remote_output.lines() {
            println!("      {}", line.dimmed());
        }
    }

    println!();
    println!("Open a pull request:");
    println!("  {}", report.compare_url.cyan());
    Ok(())
}
