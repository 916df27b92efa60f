use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{git_error, SyncEngine, Target, SETTINGS_TARGET};
use crate::error::{AnvilError, Op};
use crate::git::{branch_name_at, Credentials, DiffSummary, NON_INTERACTIVE_ENV};
use crate::process::Cmd;

/// curl exits with 22 when `-f` sees an HTTP status of 400 or above.
const CURL_HTTP_ERROR: i32 = 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Public,
    Unknown(String),
}

/// Decides whether the remote repository is private.
#[async_trait]
pub trait RepoVisibility: Send + Sync {
    async fn check(
        &self,
        repo: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Visibility;
}

/// Authenticated `ls-remote`, then an anonymous request to the public page.
/// A page anyone can fetch means the repository is public.
pub struct GitHubVisibility;

#[async_trait]
impl RepoVisibility for GitHubVisibility {
    async fn check(
        &self,
        repo: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Visibility {
        let auth = Cmd::new("git")
            .args(["ls-remote", credentials.clone_url(repo).as_str(), "HEAD"])
            .envs(NON_INTERACTIVE_ENV)
            .output(cancel)
            .await;
        match auth {
            Ok(out) if out.success => {}
            Ok(out) => {
                return Visibility::Unknown(format!(
                    "authentication failed: {}",
                    out.best_message()
                ))
            }
            Err(e) => return Visibility::Unknown(e.to_string()),
        }

        let page = format!("https://github.com/{}", repo);
        match Cmd::new("curl").args(["-s", "-f", "-I", page.as_str()]).output(cancel).await {
            Ok(out) if out.success => Visibility::Public,
            Ok(out) if out.code == Some(CURL_HTTP_ERROR) => Visibility::Private,
            Ok(out) => Visibility::Unknown(format!(
                "could not reach {} (curl exit {})",
                page,
                out.code.unwrap_or(-1)
            )),
            Err(e) => Visibility::Unknown(e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub target: String,
    pub branch: String,
    pub commit_message: String,
    pub repository_url: String,
    pub compare_url: String,
    /// Relative to the repository root.
    pub files: Vec<String>,
    pub diff: DiffSummary,
    pub remote_output: String,
    pub new_app: bool,
}

#[derive(Debug, Clone)]
pub enum PushOutcome {
    UpToDate,
    Pushed(PushReport),
}

pub fn commit_message(target: &Target) -> String {
    format!("anvil[push]: {}", target.name())
}

impl SyncEngine<'_> {
    /// Local file or directory pushed for `target`, and where it lands in the repository.
    pub fn push_source(&self, target: &Target) -> Result<(PathBuf, String), AnvilError> {
        match target {
            Target::Settings => Ok((
                self.store.paths().settings_file(),
                format!("{}/{}", SETTINGS_TARGET, crate::config::CONFIG_FILE),
            )),
            Target::App(app) => {
                let path = self
                    .store
                    .app_config_path(app)
                    .map_err(|e| AnvilError::configuration(Op::Push, "load-config", e))?
                    .ok_or_else(|| {
                        AnvilError::configuration(
                            Op::Push,
                            "resolve-source",
                            format!(
                                "app config path not defined for '{app}'. Add it to {}:\n  configs:\n    {app}: /path/to/{app}/config",
                                self.store.paths().settings_file().display()
                            ),
                        )
                    })?;
                if !path.exists() {
                    return Err(AnvilError::filesystem(
                        Op::Push,
                        "resolve-source",
                        format!("config path for '{}' does not exist: {}", app, path.display()),
                    ));
                }
                let dest = match (path.is_file(), path.file_name()) {
                    (true, Some(name)) => format!("{}/{}", app, name.to_string_lossy()),
                    _ => app.clone(),
                };
                Ok((path, dest))
            }
        }
    }

    /// Pushes `target` to a new timestamped branch, or reports that the
    /// repository already matches.
    pub async fn push(&self, target: &Target) -> Result<PushOutcome, AnvilError> {
        let settings = self.load(Op::Push)?;
        let (source, dest) = self.push_source(target)?;
        let (client, credentials) = self.client(Op::Push, &settings)?;

        match self
            .visibility
            .check(client.repo(), &credentials, &self.cancel)
            .await
        {
            Visibility::Private => info!(repo = client.repo(), "repository is private"),
            Visibility::Public => {
                return Err(AnvilError::network(
                    Op::Push,
                    "verify-privacy",
                    "SECURITY BLOCK: Repository is public. Configuration push denied for security",
                )
                .with_context(client.repo().to_string()))
            }
            Visibility::Unknown(reason) => {
                return Err(AnvilError::network(
                    Op::Push,
                    "verify-privacy",
                    format!("SECURITY BLOCK: Cannot verify repository privacy - {}", reason),
                )
                .with_context(client.repo().to_string()))
            }
        }

        client
            .ensure_repository_ready()
            .await
            .map_err(|e| git_error(Op::Push, "prepare-repository", e))?;

        let new_app = matches!(target, Target::App(app) if !client.local_path().join(app).exists());

        let diff = client
            .stage_and_diff_stat(&source, &dest)
            .await
            .map_err(|e| git_error(Op::Push, "diff", e))?;
        if diff.is_empty() {
            info!(target = target.name(), "repository already up to date");
            return Ok(PushOutcome::UpToDate);
        }

        let branch = branch_name_at((self.clock)());
        client
            .create_and_checkout_branch(&branch)
            .await
            .map_err(|e| git_error(Op::Push, "create-branch", e))?;

        // From here on the branch stays in place so the user can recover it.
        let left_at = |e: AnvilError| {
            warn!(branch = %branch, "push incomplete");
            e.with_context(format!(
                "branch '{}' left at {}",
                branch,
                client.local_path().display()
            ))
        };

        client
            .apply(&source, &dest)
            .map_err(|e| left_at(git_error(Op::Push, "copy-config", e)))?;
        client
            .stage(&dest)
            .await
            .map_err(|e| left_at(git_error(Op::Push, "stage", e)))?;

        let message = commit_message(target);
        client
            .commit_all(&message)
            .await
            .map_err(|e| left_at(git_error(Op::Push, "commit", e)))?;
        let remote_output = client
            .push_branch(&branch)
            .await
            .map_err(|e| left_at(git_error(Op::Push, "push-branch", e)))?;

        let mut files = client.last_commit_files().await.unwrap_or_default();
        if files.is_empty() {
            files.push(format!("{}/", target.name()));
        }

        Ok(PushOutcome::Pushed(PushReport {
            target: target.name().to_string(),
            compare_url: client.compare_url(&branch),
            repository_url: client.repository_url(),
            branch,
            commit_message: message,
            files,
            diff,
            remote_output,
            new_app,
        }))
    }
}
