use anyhow::{bail, Result};
use colored::Colorize;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::home_dir;
use crate::config::ConfigStore;
use crate::doctor::{
    Category, CheckResult, Doctor, DoctorContext, FixOutcome, Registry, Status, Summary,
    CONFIG_LOAD,
};
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct DoctorArgs {
    /// A check name or a category.
    pub target: Option<String>,
    pub list: bool,
    /// `Some(None)` for a bare `--fix`.
    pub fix: Option<Option<String>>,
    pub verbose: bool,
    pub yes: bool,
}

pub async fn run(store: &ConfigStore, args: DoctorArgs, cancel: &CancellationToken) -> Result<()> {
    let ctx = DoctorContext::new(store, home_dir()?, cancel.clone());
    let doctor = Doctor::new(ctx);

    if args.list {
        print_list(doctor.registry());
        return Ok(());
    }
    if let Some(scope) = &args.fix {
        let scope = scope.as_deref().or(args.target.as_deref());
        return fix(&doctor, scope, &args).await;
    }

    let results = match args.target.as_deref() {
        Some(name) if doctor.registry().get(name).is_some() => {
            let result = doctor.run_check(name).await?;
            print_result(&result, true);
            vec![result]
        }
        Some(category) => {
            ui::header(&format!("Running {} checks", category));
            let progress = |result: &CheckResult, _: usize, _: usize| {
                print_result(result, args.verbose)
            };
            doctor.run_category(category, Some(&progress)).await?
        }
        None => {
            ui::header("Running anvil health checks");
            let current = Mutex::new(None::<Category>);
            let progress = |result: &CheckResult, _: usize, _: usize| {
                if let Ok(mut current) = current.lock() {
                    if *current != Some(result.category) {
                        println!();
                        println!("{}", capitalize(result.category.as_str()).bold());
                        *current = Some(result.category);
                    }
                }
                print_result(result, args.verbose)
            };
            doctor.run_all(Some(&progress)).await
        }
    };

    // the config-load preflight bypasses the progress callback
    if let [only] = results.as_slice() {
        if only.name == CONFIG_LOAD {
            print_result(only, true);
        }
    }

    let summary = Summary::from_results(&results);
    print_summary(&summary);
    if summary.has_failures() {
        bail!(
            "{} check{} failed. Run 'anvil doctor --fix' to attempt automatic fixes",
            summary.failed,
            if summary.failed == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

async fn fix(doctor: &Doctor<'_>, scope: Option<&str>, args: &DoctorArgs) -> Result<()> {
    let candidates = doctor.fix_candidates(scope)?;
    if candidates.is_empty() {
        ui::info("No automatically fixable checks in scope");
        return Ok(());
    }

    ui::header("Checking for fixable issues");
    let mut attempted = 0;
    let mut unresolved = Vec::new();
    for validator in candidates {
        let name = validator.name();
        let before = doctor.run_check(name).await?;
        if before.status == Status::Pass {
            continue;
        }
        print_result(&before, args.verbose);
        if !before.auto_fix {
            continue;
        }
        if !args.yes && !ui::confirm(&format!("Fix '{}'?", name))? {
            ui::skip(&format!("Skipped {}", name));
            continue;
        }

        attempted += 1;
        match doctor.apply_fix(name).await? {
            FixOutcome::Fixed(after) => {
                ui::success(&format!("Fixed {}", name));
                print_result(&after, args.verbose);
            }
            FixOutcome::AlreadyPassing => ui::success(&format!("{} already passing", name)),
            FixOutcome::NotFixable(_) => ui::skip(&format!("{} cannot be fixed automatically", name)),
            FixOutcome::StillFailing(after) => {
                ui::fail(&format!("{} still failing after fix", name));
                print_result(&after, true);
                unresolved.push(name);
            }
            FixOutcome::Failed(message) => {
                ui::fail(&format!("Fix for {} failed: {}", name, message));
                unresolved.push(name);
            }
        }
    }

    println!();
    if attempted == 0 {
        ui::success("Nothing to fix");
    }
    if !unresolved.is_empty() {
        bail!("Could not fix: {}", unresolved.join(", "));
    }
    Ok(())
}

fn print_list(registry: &Registry) {
    ui::header("Available checks");
    for (category, validators) in registry.list() {
        println!();
        println!("{}", capitalize(category.as_str()).bold());
        for validator in validators {
            let fixable = if validator.can_fix() { " (fixable)" } else { "" };
            println!(
                "  {:<22} {}{}",
                validator.name(),
                validator.description(),
                fixable.dimmed()
            );
        }
    }
    println!();
    println!("Run a category:  anvil doctor <category>");
    println!("Run one check:   anvil doctor <check>");
}

fn print_result(result: &CheckResult, verbose: bool) {
    let line = format!("{}: {}", result.name, result.message);
    match result.status {
        Status::Pass => ui::success(&line),
        Status::Warn => ui::warn(&line),
        Status::Fail => ui::fail(&line),
        Status::Skip => ui::skip(&line),
    }

    let show_details = verbose || matches!(result.status, Status::Fail | Status::Warn);
    if show_details {
        for detail in &result.details {
            println!("      {}", detail.dimmed());
        }
    }
    if !result.fix_hint.is_empty() && result.status != Status::Pass {
        println!("      {} {}", "Fix:".cyan(), result.fix_hint);
    }
}

fn print_summary(summary: &Summary) {
    println!();
    println!(
        "{} passed, {} warnings, {} failed, {} skipped",
        summary.passed.to_string().green(),
        summary.warned.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.skipped.to_string().dimmed()
    );
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
