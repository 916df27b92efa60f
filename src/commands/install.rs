use anyhow::{bail, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::package_manager;
use crate::brew::PackageManager;
use crate::config::{ConfigStore, Settings, BUILT_IN_GROUPS};
use crate::error::{AnvilError, Op};
use crate::installer::{
    dedup_tools, BatchReport, BatchStats, InstallOptions, InstallResult, InstallStatus, Installer,
    PostInstallHooks,
};
use crate::presence::AppPresenceOracle;
use crate::ui;
use crate::validation::{validate_app_name, validate_group_name};

#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    pub target: Option<String>,
    pub dry_run: bool,
    pub concurrent: bool,
    pub workers: Option<usize>,
    /// Minutes per tool.
    pub timeout: Option<u64>,
    pub group_name: Option<String>,
    pub list: bool,
}

impl InstallArgs {
    fn options(&self) -> InstallOptions {
        let mut options = InstallOptions {
            dry_run: self.dry_run,
            ..InstallOptions::default()
        };
        if let Some(workers) = self.workers.filter(|w| *w > 0) {
            options.workers = workers;
        }
        if let Some(minutes) = self.timeout.filter(|m| *m > 0) {
            options.timeout = Duration::from_secs(minutes * 60);
        }
        options
    }
}

pub async fn run(store: &ConfigStore, args: InstallArgs, cancel: &CancellationToken) -> Result<()> {
    if args.list {
        return list(store);
    }
    let Some(target) = args.target.clone() else {
        bail!("Specify a group or app to install, or run 'anvil install --list'");
    };

    let (pm, oracle) = package_manager();
    install_target(store, &target, &args, Backend { pm, oracle }, cancel).await
}

/// The package manager and presence lookups an install runs against.
struct Backend {
    pm: Arc<dyn PackageManager>,
    oracle: Arc<AppPresenceOracle>,
}

async fn install_target(
    store: &ConfigStore,
    target: &str,
    args: &InstallArgs,
    backend: Backend,
    cancel: &CancellationToken,
) -> Result<()> {
    let settings = store.load()?;
    if args.group_name.is_none() && store.has_group(target)? {
        install_group(store, &settings, target, args, backend, cancel).await
    } else {
        install_app(store, &settings, target, args, backend, cancel).await
    }
}

fn list(store: &ConfigStore) -> Result<()> {
    let settings = store.load()?;

    ui::header("Built-in groups");
    for group in BUILT_IN_GROUPS {
        print_group(&settings, group);
    }

    let custom = settings.custom_groups();
    if !custom.is_empty() {
        println!();
        ui::header("Custom groups");
        for group in &custom {
            print_group(&settings, group);
        }
    }

    let mut apps = store.installed_apps()?;
    if !apps.is_empty() {
        apps.sort();
        println!();
        ui::header("Individually installed apps");
        for app in &apps {
            ui::info(app);
        }
    }
    Ok(())
}

fn print_group(settings: &Settings, group: &str) {
    let tools = settings.groups.get(group).cloned().unwrap_or_default();
    println!(
        "  {} {}",
        format!("{}:", group).bold(),
        tools.join(", ").dimmed()
    );
}

async fn install_group(
    store: &ConfigStore,
    settings: &Settings,
    group: &str,
    args: &InstallArgs,
    backend: Backend,
    cancel: &CancellationToken,
) -> Result<()> {
    let tools = store.group_tools(group)?;
    let (tools, duplicates) = dedup_tools(&tools);
    if !duplicates.is_empty() {
        ui::warn(&format!(
            "Removed duplicate tools from group '{}': {}",
            group,
            duplicates.join(", ")
        ));
        if !args.dry_run {
            store.update_group_tools(group, tools.clone())?;
        }
    }

    let options = args.options();
    let mode = if args.concurrent {
        format!("concurrently with {} workers", options.workers)
    } else {
        "serially".to_string()
    };
    ui::header(&format!(
        "Installing group '{}' ({} tools) {}",
        group,
        tools.len(),
        mode
    ));

    let Backend { pm, oracle } = backend;
    ensure_homebrew(pm.is_available(), args.dry_run)?;

    let progress = Arc::new(|result: &InstallResult, done: usize, total: usize| {
        print!("{} ", format!("[{}/{}]", done, total).dimmed());
        print_result(result);
    });
    let installer = Installer::new(pm, oracle, options)
        .with_hooks(PostInstallHooks::from_settings(settings))
        .with_progress(progress);

    let report = if args.concurrent {
        installer.install_batch(&tools, cancel).await?
    } else {
        installer.install_serial(&tools, cancel).await?
    };

    print_summary(&report, args.concurrent);
    if args.dry_run {
        ui::dry_run_notice();
    }

    match report.error(group) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

async fn install_app(
    store: &ConfigStore,
    settings: &Settings,
    app: &str,
    args: &InstallArgs,
    backend: Backend,
    cancel: &CancellationToken,
) -> Result<()> {
    validate_app_name(app).map_err(|e| AnvilError::validation(Op::Install, app, e))?;
    if let Some(group) = &args.group_name {
        validate_group_name(group).map_err(|e| AnvilError::validation(Op::Install, group, e))?;
    }

    ui::header(&format!("Installing {}", app));

    let Backend { pm, oracle } = backend;
    ensure_homebrew(pm.is_available(), args.dry_run)?;

    let installer = Installer::new(pm, oracle, args.options())
        .with_hooks(PostInstallHooks::from_settings(settings));
    let result = installer.install_one(app, cancel).await;
    print_result(&result);

    if let Err(e) = &result.outcome {
        return Err(AnvilError::installation(Op::Install, app, e.to_string()).into());
    }
    if args.dry_run {
        ui::dry_run_notice();
        return Ok(());
    }

    match &args.group_name {
        Some(group) => {
            if store.add_app_to_group(group, app)? {
                ui::success(&format!("Added {} to group '{}'", app, group));
            }
            if store.remove_installed_app(app)? {
                ui::info(&format!("Moved {} out of tools.installed_apps", app));
            }
        }
        None if result.newly_installed() && !store.is_app_tracked(app)? => {
            if store.add_installed_app(app)? {
                ui::success(&format!("Tracking {} in tools.installed_apps", app));
            }
        }
        None => {}
    }
    Ok(())
}

fn ensure_homebrew(available: bool, dry_run: bool) -> Result<()> {
    if available || dry_run {
        return Ok(());
    }
    Err(AnvilError::installation(
        Op::Install,
        "check-homebrew",
        "Homebrew is not installed. Run 'anvil init' first",
    )
    .into())
}

pub fn print_result(result: &InstallResult) {
    let tool = &result.tool;
    match &result.outcome {
        Ok(InstallStatus::AlreadyPresent(evidence)) => {
            ui::success(&format!("{} already installed ({})", tool, evidence))
        }
        Ok(InstallStatus::WouldInstall) => ui::skip(&format!("Would install {}", tool)),
        Ok(InstallStatus::Installed { attempts, .. }) if *attempts > 1 => ui::success(&format!(
            "Installed {} after {} attempts ({:.1}s)",
            tool,
            attempts,
            result.duration.as_secs_f64()
        )),
        Ok(InstallStatus::Installed { .. }) => ui::success(&format!(
            "Installed {} ({:.1}s)",
            tool,
            result.duration.as_secs_f64()
        )),
        Ok(InstallStatus::ExistingApp) => {
            ui::success(&format!("{} is already present in /Applications", tool))
        }
        Err(e) => ui::fail(&e.to_string()),
    }
    for note in &result.notes {
        println!("      {}", note.dimmed());
    }
}

fn print_summary(report: &BatchReport, concurrent: bool) {
    let stats: &BatchStats = &report.stats;
    println!();
    println!(
        "{} of {} succeeded, {} failed in {:.1}s",
        stats.succeeded.to_string().green(),
        stats.total,
        if stats.failed > 0 {
            stats.failed.to_string().red()
        } else {
            stats.failed.to_string().normal()
        },
        stats.wall.as_secs_f64()
    );
    if concurrent {
        println!(
            "  {}",
            format!(
                "per tool min {:.1}s / avg {:.1}s / max {:.1}s with {} workers",
                stats.min.as_secs_f64(),
                stats.avg.as_secs_f64(),
                stats.max.as_secs_f64(),
                stats.workers
            )
            .dimmed()
        );
        if let Some(speedup) = stats.speedup() {
            println!("  {}", format!("~{:.1}x faster than serial", speedup).dimmed());
        }
    }

    let failures: Vec<_> = report.failures().map(|r| r.tool.as_str()).collect();
    if !failures.is_empty() {
        ui::warn(&format!("Failed: {}", failures.join(", ")));
    }
}
