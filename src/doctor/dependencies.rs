use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{Category, CheckResult, DoctorContext, Registry, Status, Validator};
use crate::installer::{InstallOptions, Installer, PostInstallHooks};

pub(super) fn register(registry: &mut Registry) {
    registry.register(Box::new(Homebrew));
    registry.register(Box::new(HomebrewUpdates));
    registry.register(Box::new(RequiredTools));
    registry.register(Box::new(OptionalTools));
}

/// Splits `tools` into (present, missing) according to the presence oracle.
async fn partition(ctx: &DoctorContext<'_>, tools: &[String]) -> (Vec<String>, Vec<String>) {
    let mut present = Vec::new();
    let mut missing = Vec::new();
    for tool in tools {
        match ctx.oracle.is_present(tool, &ctx.cancel).await {
            Ok(true) => present.push(tool.clone()),
            _ => missing.push(tool.clone()),
        }
    }
    (present, missing)
}

struct Homebrew;

#[async_trait]
impl Validator for Homebrew {
    fn name(&self) -> &'static str {
        "homebrew"
    }

    fn category(&self) -> Category {
        Category::Dependencies
    }

    fn description(&self) -> &'static str {
        "Verify Homebrew is installed and functional"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        if !ctx.pm.is_available() {
            return self
                .report(Status::Fail, "Homebrew is not installed")
                .with_detail("Homebrew is required for app installation")
                .with_fix_hint("Homebrew will be installed automatically")
                .fixable(true);
        }

        match ctx.pm.version(&ctx.cancel).await {
            Ok(version) => self
                .report(Status::Pass, "Homebrew is installed and functional")
                .with_detail(version),
            Err(e) => self
                .report(Status::Fail, "Homebrew is not functional")
                .with_detail(format!("brew --version failed: {}", e))
                .with_fix_hint("Try running 'brew doctor' to diagnose issues"),
        }
    }

    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        if ctx.pm.is_available() {
            return Ok(());
        }
        ctx.pm
            .install_self(&ctx.cancel)
            .await
            .context("Failed to install Homebrew")
    }
}

struct HomebrewUpdates;

#[async_trait]
impl Validator for HomebrewUpdates {
    fn name(&self) -> &'static str {
        "homebrew-updates"
    }

    fn category(&self) -> Category {
        Category::Dependencies
    }

    fn description(&self) -> &'static str {
        "Check whether Homebrew packages are up to date"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        if !ctx.pm.is_available() {
            return self
                .report(Status::Skip, "Homebrew is not installed")
                .with_fix_hint("Run 'anvil doctor homebrew --fix' first");
        }

        match ctx.pm.outdated(&ctx.cancel).await {
            Ok(outdated) if outdated.is_empty() => {
                self.report(Status::Pass, "Homebrew packages are up to date")
            }
            Ok(outdated) => self
                .report(
                    Status::Warn,
                    &format!("Homebrew has {} outdated packages", outdated.len()),
                )
                .with_details(outdated)
                .with_fix_hint("Run 'brew update && brew upgrade' to update")
                .fixable(true),
            Err(e) => self
                .report(Status::Warn, "Could not check for Homebrew updates")
                .with_detail(e.to_string()),
        }
    }

    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        ctx.pm
            .update(&ctx.cancel)
            .await
            .context("Failed to update Homebrew")
    }
}

struct RequiredTools;

#[async_trait]
impl Validator for RequiredTools {
    fn name(&self) -> &'static str {
        "required-tools"
    }

    fn category(&self) -> Category {
        Category::Dependencies
    }

    fn description(&self) -> &'static str {
        "Verify all required tools are installed"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let tools = match ctx.settings() {
            Ok(settings) => settings.tools.required_tools,
            Err(e) => {
                return self
                    .report(Status::Fail, "Could not read required tools")
                    .with_detail(format!("{:#}", e))
            }
        };
        if tools.is_empty() {
            return self.report(Status::Pass, "No required tools configured");
        }

        let (present, missing) = partition(ctx, &tools).await;
        if !missing.is_empty() {
            return self
                .report(
                    Status::Fail,
                    &format!("Missing required tools: {}", missing.join(", ")),
                )
                .with_detail(format!("Installed: {}/{}", present.len(), tools.len()))
                .with_fix_hint("Missing tools will be installed automatically")
                .fixable(true);
        }

        self.report(
            Status::Pass,
            &format!("All required tools installed ({}/{})", present.len(), tools.len()),
        )
        .with_details(present)
    }

    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        let settings = ctx.settings()?;
        let (_, missing) = partition(ctx, &settings.tools.required_tools).await;
        if missing.is_empty() {
            return Ok(());
        }

        let installer = Installer::new(
            ctx.pm.clone(),
            ctx.oracle.clone(),
            InstallOptions::default(),
        )
        .with_hooks(PostInstallHooks::from_settings(&settings));
        let report = installer.install_serial(&missing, &ctx.cancel).await?;

        let failed: Vec<String> = report
            .failures()
            .map(|r| match &r.outcome {
                Err(e) => format!("{}: {}", r.tool, e),
                Ok(_) => r.tool.clone(),
            })
            .collect();
        if !failed.is_empty() {
            bail!("failed to install some tools: {}", failed.join("; "));
        }
        Ok(())
    }
}

struct OptionalTools;

#[async_trait]
impl Validator for OptionalTools {
    fn name(&self) -> &'static str {
        "optional-tools"
    }

    fn category(&self) -> Category {
        Category::Dependencies
    }

    fn description(&self) -> &'static str {
        "Check status of optional tools"
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let tools = match ctx.settings() {
            Ok(settings) => settings.tools.optional_tools,
            Err(e) => {
                return self
                    .report(Status::Fail, "Could not read optional tools")
                    .with_detail(format!("{:#}", e))
            }
        };
        if tools.is_empty() {
            return self.report(Status::Pass, "No optional tools configured");
        }

        let (present, missing) = partition(ctx, &tools).await;
        if !missing.is_empty() {
            return self
                .report(
                    Status::Warn,
                    &format!("Optional tools missing: {}", missing.join(", ")),
                )
                .with_detail(format!("Installed: {}/{}", present.len(), tools.len()))
                .with_fix_hint(format!(
                    "Run 'anvil install {}' to install missing tools",
                    missing.join(" ")
                ));
        }

        self.report(
            Status::Pass,
            &format!("All optional tools installed ({}/{})", present.len(), tools.len()),
        )
        .with_details(present)
    }
}
