//! Pull, push and sync of configuration against the dotfiles repository.

mod apply;
mod archive;
mod pull;
mod push;

pub use apply::{SyncPlan, SyncReport};
pub use archive::{archive_name, archive_prefix, create_archive};
pub use pull::{pull_warnings, PullReport};
pub use push::{GitHubVisibility, PushOutcome, PushReport, RepoVisibility, Visibility};

use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, Settings};
use crate::error::{AnvilError, ErrorKind, Op};
use crate::git::{Credentials, GitClient, GitError};
use crate::validation::{is_canonical_repo, validate_app_name};

/// Name used for the anvil settings in the repository and under temp/.
pub const SETTINGS_TARGET: &str = "anvil";

/// What a push or sync acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Settings,
    App(String),
}

impl Target {
    /// No argument and `anvil` both mean the settings file.
    pub fn parse(op: Op, arg: Option<&str>) -> Result<Self, AnvilError> {
        match arg {
            None | Some(SETTINGS_TARGET) => Ok(Target::Settings),
            Some(app) => {
                validate_app_name(app).map_err(|e| AnvilError::validation(op, "parse-target", e))?;
                Ok(Target::App(app.to_string()))
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Settings => SETTINGS_TARGET,
            Target::App(app) => app,
        }
    }
}

/// Orchestrates the settings store and the git working copy.
pub struct SyncEngine<'a> {
    store: &'a ConfigStore,
    cancel: CancellationToken,
    remote_url: Option<String>,
    visibility: Arc<dyn RepoVisibility>,
    clock: fn() -> DateTime<Local>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(store: &'a ConfigStore) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
            remote_url: None,
            visibility: Arc::new(GitHubVisibility),
            clock: Local::now,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Overrides the GitHub remote, e.g. with a `file://` URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    #[cfg(test)]
    pub fn with_visibility(mut self, visibility: Arc<dyn RepoVisibility>) -> Self {
        self.visibility = visibility;
        self
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        self.store
    }

    fn load(&self, op: Op) -> Result<Settings, AnvilError> {
        self.store
            .load()
            .map_err(|e| AnvilError::configuration(op, "load-config", e))
    }

    /// Checks the github section and credentials, then builds a client.
    fn client(&self, op: Op, settings: &Settings) -> Result<(GitClient, Credentials), AnvilError> {
        let github = &settings.github;
        let missing = |key: &str, example: &str| {
            AnvilError::configuration(
                op,
                "validate-config",
                format!(
                    "github.{key} is not configured. Add it to {}:\n  github:\n    {key}: {example}",
                    self.store.paths().settings_file().display()
                ),
            )
        };
        if github.config_repo.trim().is_empty() {
            return Err(missing("config_repo", "\"username/dotfiles\""));
        }
        if !is_canonical_repo(&github.config_repo) {
            return Err(AnvilError::configuration(
                op,
                "validate-config",
                format!(
                    "github.config_repo '{}' must be a GitHub repository in owner/repo form. Fix it in {}:\n  github:\n    config_repo: \"username/dotfiles\"",
                    github.config_repo,
                    self.store.paths().settings_file().display()
                ),
            ));
        }
        if github.branch.trim().is_empty() {
            return Err(missing("branch", "\"main\""));
        }
        if github.local_path.trim().is_empty() {
            return Err(missing("local_path", "\"~/.anvil/dotfiles\""));
        }

        let credentials = Credentials::from_settings(github, &settings.git);
        if credentials.is_empty() {
            return Err(AnvilError::configuration(
                op,
                "authenticate",
                format!(
                    "no GitHub credentials found. Set {} or configure git.ssh_key_path to an existing key",
                    github.token_env_var
                ),
            ));
        }

        let mut client =
            GitClient::new(github, &settings.git, &credentials).with_cancel(self.cancel.clone());
        if let Some(url) = &self.remote_url {
            client = client.with_remote_url(url.clone());
        }
        Ok((client, credentials))
    }
}

/// Maps a git failure onto the error taxonomy.
pub(crate) fn git_error(op: Op, command: &str, err: GitError) -> AnvilError {
    let kind = match &err {
        GitError::BranchNotFound { .. } => ErrorKind::Validation,
        GitError::Unreachable { .. } | GitError::CommandFailed { .. } => ErrorKind::Network,
        GitError::Filesystem(_) | GitError::NotARepository(_) | GitError::DirtyPath { .. } => {
            ErrorKind::FileSystem
        }
        GitError::NothingToCommit | GitError::Process(_) => ErrorKind::General,
    };
    AnvilError::new(op, command, kind, err)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{AnvilPaths, Settings};
    use std::fs;
    use std::path::Path;

    /// A store under `temp/.anvil` whose github section points at `temp/wc`
    /// and whose SSH key exists, so credentials are satisfied.
    pub(crate) fn store_for(temp: &Path, branch: &str) -> ConfigStore {
        let key = temp.join("id_ed25519");
        fs::write(&key, "key").unwrap();

        let store = ConfigStore::new(AnvilPaths::new(temp.join(".anvil")));
        let mut settings = Settings::sample();
        settings.github.config_repo = "alice/dotfiles".to_string();
        settings.github.branch = branch.to_string();
        settings.github.local_path = temp.join("wc").display().to_string();
        settings.github.token_env_var = "ANVIL_TEST_NO_TOKEN".to_string();
        settings.git.username = "Alice".to_string();
        settings.git.email = "alice@example.com".to_string();
        settings.git.ssh_key_path = key.display().to_string();
        store.save(&settings).unwrap();
        store.paths().create_directories().unwrap();
        store
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(Target::parse(Op::Push, None).unwrap(), Target::Settings);
        assert_eq!(Target::parse(Op::Push, Some("anvil")).unwrap(), Target::Settings);
        assert_eq!(
            Target::parse(Op::Push, Some("cursor")).unwrap(),
            Target::App("cursor".to_string())
        );
        let err = Target::parse(Op::Sync, Some("bad name")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_client_requires_credentials() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = store_for(temp.path(), "main");
        store
            .update(|s| {
                s.git.ssh_key_path = temp.path().join("missing").display().to_string();
                Ok(true)
            })
            .unwrap();

        let engine = SyncEngine::new(&store);
        let settings = store.load().unwrap();
        let err = engine.client(Op::Pull, &settings).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.to_string().contains("ANVIL_TEST_NO_TOKEN"));
    }

    #[test]
    fn test_client_rejects_non_github_repo() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = store_for(temp.path(), "main");
        fs::write(
            store.paths().settings_file(),
            fs::read_to_string(store.paths().settings_file())
                .unwrap()
                .replace("alice/dotfiles", "gitlab.com/alice/dotfiles"),
        )
        .unwrap();

        let settings = store.load().unwrap();
        assert_eq!(settings.github.config_repo, "gitlab.com/alice/dotfiles");
        let err = SyncEngine::new(&store).client(Op::Pull, &settings).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err
            .to_string()
            .contains("github.config_repo 'gitlab.com/alice/dotfiles' must be a GitHub repository"));
    }

    #[test]
    fn test_client_requires_repo() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = store_for(temp.path(), "main");
        store
            .update(|s| {
                s.github.config_repo.clear();
                Ok(true)
            })
            .unwrap();

        let settings = store.load().unwrap();
        let err = SyncEngine::new(&store).client(Op::Push, &settings).err().unwrap();
        assert!(err.to_string().contains("github.config_repo is not configured"));
    }
}
