use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{Category, CheckResult, DoctorContext, Registry, Status, Validator};
use crate::config::{expand, global_git_value};
use crate::git::Credentials;
use crate::validation::{is_canonical_repo, is_valid_email, normalize_repo};

pub(super) fn register(registry: &mut Registry) {
    registry.register(Box::new(GitConfig));
    registry.register(Box::new(GitHubConfig));
    registry.register(Box::new(AppConfigPaths));
    registry.register(Box::new(SyncConfig));
}

struct GitConfig;

#[async_trait]
impl Validator for GitConfig {
    fn name(&self) -> &'static str {
        "git-config"
    }

    fn category(&self) -> Category {
        Category::Configuration
    }

    fn description(&self) -> &'static str {
        "Verify git identity is configured"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let git = match ctx.settings() {
            Ok(settings) => settings.git,
            Err(e) => {
                return self
                    .report(Status::Fail, "Could not read git configuration")
                    .with_detail(format!("{:#}", e))
            }
        };

        let mut issues = Vec::new();
        if git.username.trim().is_empty() {
            issues.push("username not set");
        }
        if git.email.trim().is_empty() {
            issues.push("email not set");
        } else if !is_valid_email(&git.email) {
            issues.push("email format invalid");
        }
        if !issues.is_empty() {
            return self
                .report(
                    Status::Fail,
                    &format!("Git configuration incomplete: {}", issues.join(", ")),
                )
                .with_fix_hint("Values will be read from your global git config")
                .fixable(true);
        }

        let mut result = self
            .report(Status::Pass, "Git configuration is complete")
            .with_detail(format!("Username: {}", git.username))
            .with_detail(format!("Email: {}", git.email));

        if !git.ssh_key_path.is_empty() {
            let key = expand(&git.ssh_key_path);
            if key.exists() {
                result = result.with_detail(format!("SSH key: {}", key.display()));
            } else {
                result.status = Status::Warn;
                result.message = "SSH key not found".to_string();
                result = result
                    .with_detail(format!("Missing: {}", key.display()))
                    .with_fix_hint("Update git.ssh_key_path in settings.yaml");
            }
        }
        result
    }

    /// Fills only the empty fields, from `git config --global`.
    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        let name = global_git_value("user.name", &ctx.home).await;
        let email = global_git_value("user.email", &ctx.home).await;

        ctx.store.update(|settings| {
            let git = &mut settings.git;
            let mut changed = false;
            if git.username.trim().is_empty() {
                if let Some(name) = &name {
                    git.username = name.clone();
                    changed = true;
                }
            }
            if git.email.trim().is_empty() || !is_valid_email(&git.email) {
                if let Some(email) = email.as_ref().filter(|e| is_valid_email(e)) {
                    git.email = email.clone();
                    changed = true;
                }
            }
            Ok(changed)
        })?;

        let git = ctx.settings()?.git;
        if git.username.trim().is_empty() {
            bail!("user.name is not set globally; run 'git config --global user.name \"Your Name\"'");
        }
        if !is_valid_email(&git.email) {
            bail!("user.email is not set globally; run 'git config --global user.email you@example.com'");
        }
        Ok(())
    }
}

struct GitHubConfig;

#[async_trait]
impl Validator for GitHubConfig {
    fn name(&self) -> &'static str {
        "github-config"
    }

    fn category(&self) -> Category {
        Category::Configuration
    }

    fn description(&self) -> &'static str {
        "Verify GitHub repository settings for config sync"
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let settings = match ctx.settings() {
            Ok(settings) => settings,
            Err(e) => {
                return self
                    .report(Status::Fail, "Could not read GitHub configuration")
                    .with_detail(format!("{:#}", e))
            }
        };
        let github = &settings.github;

        if github.config_repo.is_empty() {
            return self
                .report(Status::Warn, "GitHub repository not configured")
                .with_fix_hint("Set github.config_repo in settings.yaml to enable config sync");
        }
        if !is_canonical_repo(&github.config_repo) {
            let suggestion = normalize_repo(&github.config_repo);
            let mut result = self
                .report(Status::Fail, "GitHub repository format is invalid")
                .with_detail(format!("Repository: {}", github.config_repo));
            if is_canonical_repo(&suggestion) {
                result = result.with_fix_hint(format!(
                    "Set github.config_repo to '{}'",
                    suggestion
                ));
            } else {
                result = result.with_fix_hint("Use the form 'owner/repository'");
            }
            return result;
        }
        if github.branch.trim().is_empty() {
            return self
                .report(Status::Fail, "GitHub branch not configured")
                .with_fix_hint("Set github.branch in settings.yaml (e.g. 'main')");
        }
        if github.local_path.trim().is_empty() {
            return self
                .report(Status::Fail, "Local repository path not configured")
                .with_fix_hint("Set github.local_path in settings.yaml");
        }

        let credentials = Credentials::from_settings(github, &settings.git);
        let auth = match (&credentials.token, &credentials.ssh_key) {
            (Some(_), _) => format!("Authentication: token from ${}", github.token_env_var),
            (None, Some(key)) => format!("Authentication: SSH key {}", key.display()),
            (None, None) => {
                return self
                    .report(Status::Warn, "No GitHub authentication configured")
                    .with_detail(format!("Repository: {}", github.config_repo))
                    .with_fix_hint(format!(
                        "Export {} or set git.ssh_key_path in settings.yaml",
                        github.token_env_var
                    ))
            }
        };

        self.report(Status::Pass, "GitHub configuration is valid")
            .with_detail(format!("Repository: {}", github.config_repo))
            .with_detail(format!("Branch: {}", github.branch))
            .with_detail(format!(
                "Local path: {}",
                github.expanded_local_path().display()
            ))
            .with_detail(auth)
    }
}

struct AppConfigPaths;

#[async_trait]
impl Validator for AppConfigPaths {
    fn name(&self) -> &'static str {
        "app-config-paths"
    }

    fn category(&self) -> Category {
        Category::Configuration
    }

    fn description(&self) -> &'static str {
        "Verify configured app config paths"
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let configs = match ctx.settings() {
            Ok(settings) => settings.configs,
            Err(e) => {
                return self
                    .report(Status::Fail, "Could not read app config paths")
                    .with_detail(format!("{:#}", e))
            }
        };
        if configs.is_empty() {
            return self.report(Status::Pass, "No app config paths configured");
        }

        let mut invalid = Vec::new();
        let mut missing = Vec::new();
        for (app, raw) in &configs {
            let path = expand(raw);
            if !path.is_absolute() {
                invalid.push(format!("{}: path must be absolute ({})", app, raw));
            } else if !path.exists() {
                missing.push(format!("{}: {} does not exist", app, path.display()));
            }
        }

        if !invalid.is_empty() {
            return self
                .report(Status::Fail, "Invalid app config paths")
                .with_details(invalid)
                .with_fix_hint("Use absolute paths (or ~/...) under configs in settings.yaml");
        }
        if !missing.is_empty() {
            return self
                .report(Status::Warn, "Some app config paths do not exist")
                .with_details(missing)
                .with_fix_hint("Install the app or run 'anvil config sync <app>' to create them");
        }

        self.report(
            Status::Pass,
            &format!("All {} app config paths are valid", configs.len()),
        )
        .with_details(configs.keys().cloned().collect())
    }
}

struct SyncConfig;

#[async_trait]
impl Validator for SyncConfig {
    fn name(&self) -> &'static str {
        "sync-config"
    }

    fn category(&self) -> Category {
        Category::Configuration
    }

    fn description(&self) -> &'static str {
        "Validate sync configuration"
    }

    async fn validate(&self, _ctx: &DoctorContext<'_>) -> CheckResult {
        self.report(
            Status::Skip,
            "Sync configuration validation not yet implemented",
        )
        .with_fix_hint("Sync settings will be read from a '_sync_config' section once supported")
    }
}
