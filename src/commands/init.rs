use anyhow::{Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use super::{ensure_macos, home_dir, package_manager};
use crate::config::{environment_warnings, ConfigStore};
use crate::error::Op;
use crate::installer::{InstallOptions, Installer, PostInstallHooks};
use crate::ui;

pub async fn run(store: &ConfigStore, skip_tools: bool, cancel: &CancellationToken) -> Result<()> {
    ensure_macos(Op::Init)?;
    let home = home_dir()?;
    let paths = store.paths();

    ui::header("Initializing anvil");

    paths.create_directories()?;
    ui::success(&format!("Directories ready under {}", paths.root().display()));

    if store.generate_default(&home).await? {
        ui::success(&format!("Created {}", paths.settings_file().display()));
    } else {
        ui::skip(&format!(
            "Settings already exist at {} (left untouched)",
            paths.settings_file().display()
        ));
    }

    if skip_tools {
        ui::skip("Skipping tool installation (--skip-tools)");
    } else {
        bootstrap_tools(store, cancel).await?;
    }

    let warnings = environment_warnings(&home).await;
    if !warnings.is_empty() {
        println!();
        ui::header("Recommendations");
        for warning in &warnings {
            ui::warn(warning);
        }
    }

    println!();
    println!("Next steps:");
    println!("  1. Review {}", paths.settings_file().display());
    println!("  2. Set github.config_repo to your private dotfiles repository");
    println!("  3. Run: {}", "anvil doctor".bold());

    Ok(())
}

/// Homebrew first, then every required tool, one at a time.
async fn bootstrap_tools(store: &ConfigStore, cancel: &CancellationToken) -> Result<()> {
    let (pm, oracle) = package_manager();

    if pm.is_available() {
        ui::success("Homebrew is installed");
    } else {
        ui::info("Installing Homebrew...");
        pm.install_self(cancel)
            .await
            .context("Failed to install Homebrew")?;
        ui::success("Homebrew installed");
    }

    let settings = store.load()?;
    let required = settings.tools.required_tools.clone();
    if required.is_empty() {
        return Ok(());
    }

    let installer = Installer::new(pm, oracle, InstallOptions::default())
        .with_hooks(PostInstallHooks::from_settings(&settings));
    let report = installer.install_serial(&required, cancel).await?;
    for result in &report.results {
        super::install::print_result(result);
    }

    match report.error("required-tools") {
        Some(err) => Err(err.with_context("required tools").into()),
        None => Ok(()),
    }
}
