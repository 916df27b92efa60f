use async_trait::async_trait;
use std::time::Duration;

use super::{Category, CheckResult, DoctorContext, Registry, Status, Validator};
use crate::config::global_git_value;
use crate::git::{GitError, NON_INTERACTIVE_ENV};
use crate::process::Cmd;
use crate::sync::Visibility;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

pub(super) fn register(registry: &mut Registry) {
    registry.register(Box::new(GitHubAccess));
    registry.register(Box::new(RepositoryAccess));
    registry.register(Box::new(GitConnectivity));
}

struct GitHubAccess;

#[async_trait]
impl Validator for GitHubAccess {
    fn name(&self) -> &'static str {
        "github-access"
    }

    fn category(&self) -> Category {
        Category::Connectivity
    }

    fn description(&self) -> &'static str {
        "Test GitHub API access and authentication"
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
        if settings.github.config_repo.is_empty() {
            return self
                .report(Status::Skip, "GitHub repository not configured")
                .with_fix_hint("Set github.config_repo in settings.yaml");
        }

        let (_, credentials) = ctx.git_client(&settings);
        if let Some(token) = &credentials.token {
            let header = format!("Authorization: token {}", token);
            let probe = Cmd::new("curl")
                .args(["-s", "-f", "-o", "/dev/null", "-H", header.as_str()])
                .arg("https://api.github.com/user")
                .timeout(PROBE_TIMEOUT)
                .output(&ctx.cancel)
                .await;
            return match probe {
                Ok(out) if out.success => self
                    .report(Status::Pass, "GitHub API access confirmed")
                    .with_detail(format!("Token from ${}", settings.github.token_env_var)),
                Ok(out) => self
                    .report(Status::Fail, "GitHub API rejected the token")
                    .with_detail(format!("curl exit {}", out.code.unwrap_or(-1)))
                    .with_fix_hint(format!(
                        "Check that ${} holds a valid token with repo scope",
                        settings.github.token_env_var
                    )),
                Err(e) => self
                    .report(Status::Fail, "Could not reach the GitHub API")
                    .with_detail(e.to_string())
                    .with_fix_hint("Check your internet connection"),
            };
        }

        if credentials.ssh_key.is_none() {
            return self
                .report(Status::Warn, "No GitHub credentials available")
                .with_fix_hint(format!(
                    "Export {} or set git.ssh_key_path in settings.yaml",
                    settings.github.token_env_var
                ));
        }

        // `ssh -T` exits 1 even when authentication succeeds.
        let probe = Cmd::new("ssh")
            .args(["-T", "-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=accept-new"])
            .arg("git@github.com")
            .timeout(PROBE_TIMEOUT)
            .output(&ctx.cancel)
            .await;
        match probe {
            Ok(out) if out.stderr.contains("successfully authenticated") => {
                self.report(Status::Pass, "GitHub SSH authentication confirmed")
            }
            Ok(out) => self
                .report(Status::Fail, "GitHub SSH authentication failed")
                .with_detail(out.best_message().to_string())
                .with_fix_hint("Add your SSH key to GitHub and to ssh-agent"),
            Err(e) => self
                .report(Status::Fail, "Could not reach GitHub over SSH")
                .with_detail(e.to_string()),
        }
    }
}

/// Remote reachable, configured branch present, and the repository private.
struct RepositoryAccess;

#[async_trait]
impl Validator for RepositoryAccess {
    fn name(&self) -> &'static str {
        "repository-access"
    }

    fn category(&self) -> Category {
        Category::Connectivity
    }

    fn description(&self) -> &'static str {
        "Test access to the configuration repository"
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
        if settings.github.config_repo.is_empty() {
            return self
                .report(Status::Skip, "GitHub repository not configured")
                .with_fix_hint("Set github.config_repo in settings.yaml");
        }

        let (client, credentials) = ctx.git_client(&settings);
        match client.validate_repository().await {
            Ok(()) => {}
            Err(GitError::BranchNotFound {
                branch, available, ..
            }) => {
                let result = self
                    .report(
                        Status::Fail,
                        &format!("Branch '{}' not found in repository", branch),
                    )
                    .with_fix_hint("Update github.branch in settings.yaml to an existing branch");
                return match available {
                    Some(branches) => result.with_details(
                        branches
                            .into_iter()
                            .map(|b| format!("Available: {}", b))
                            .collect(),
                    ),
                    None => result.with_detail("Could not list remote branches"),
                };
            }
            Err(e) => {
                return self
                    .report(Status::Fail, "Cannot access repository")
                    .with_detail(e.to_string())
                    .with_fix_hint("Check the repository name and your credentials")
            }
        }

        match ctx
            .visibility
            .check(client.repo(), &credentials, &ctx.cancel)
            .await
        {
            Visibility::Private => self
                .report(Status::Pass, "Repository is accessible and private")
                .with_detail(format!("Repository: {}", client.repo()))
                .with_detail(format!("Branch: {}", client.branch())),
            Visibility::Public => self
                .report(Status::Fail, "Repository is public")
                .with_detail(format!("Repository: {}", client.repository_url()))
                .with_detail("Configuration files may contain secrets")
                .with_fix_hint("Make the repository private in its GitHub settings"),
            Visibility::Unknown(reason) => self
                .report(Status::Warn, "Could not determine repository visibility")
                .with_detail(reason)
                .with_fix_hint("Pushes will be blocked until the repository is confirmed private"),
        }
    }
}

struct GitConnectivity;

#[async_trait]
impl Validator for GitConnectivity {
    fn name(&self) -> &'static str {
        "git-connectivity"
    }

    fn category(&self) -> Category {
        Category::Connectivity
    }

    fn description(&self) -> &'static str {
        "Verify git is installed and usable"
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let version = match Cmd::new("git")
            .arg("--version")
            .envs(NON_INTERACTIVE_ENV)
            .output(&ctx.cancel)
            .await
        {
            Ok(out) if out.success => out.stdout_trimmed().to_string(),
            Ok(out) => {
                return self
                    .report(Status::Fail, "Git is not functional")
                    .with_detail(out.best_message().to_string())
            }
            Err(e) => {
                return self
                    .report(Status::Fail, "Git is not installed")
                    .with_detail(e.to_string())
                    .with_fix_hint("Run 'anvil install git'")
            }
        };

        let name = global_git_value("user.name", &ctx.home).await;
        let email = global_git_value("user.email", &ctx.home).await;
        let mut unset = Vec::new();
        if name.is_none() {
            unset.push("user.name");
        }
        if email.is_none() {
            unset.push("user.email");
        }
        if !unset.is_empty() {
            return self
                .report(Status::Warn, "Global git identity is incomplete")
                .with_detail(version)
                .with_detail(format!("Not set: {}", unset.join(", ")))
                .with_fix_hint("Run 'git config --global user.name \"Your Name\"' and user.email");
        }

        self.report(Status::Pass, "Git is installed and configured")
            .with_detail(version)
            .with_detail(format!(
                "Identity: {} <{}>",
                name.unwrap_or_default(),
                email.unwrap_or_default()
            ))
    }
}
