use std::path::{Component, Path, PathBuf};
use tracing::info;

use super::{git_error, SyncEngine};
use crate::config::Settings;
use crate::error::{AnvilError, Op};
use crate::fsutil;

#[derive(Debug, Clone)]
pub struct PullReport {
    pub directory: String,
    pub repo: String,
    pub branch: String,
    pub staged: PathBuf,
    /// Relative to `staged`.
    pub files: Vec<PathBuf>,
}

/// Non-fatal guidance shown before pulling.
pub fn pull_warnings(settings: &Settings) -> Vec<String> {
    let mut warnings = Vec::new();
    let branch = settings.github.branch.as_str();
    if !branch.is_empty() && branch != "main" && branch != "master" {
        warnings.push(format!(
            "Using branch '{}'. Most repositories use 'main' or 'master'",
            branch
        ));
    }
    if !settings.git.is_complete() {
        warnings.push(
            "git.username or git.email is empty in settings.yaml. Run 'anvil doctor git-config --fix'"
                .to_string(),
        );
    }
    warnings
}

fn is_plain_relative(directory: &str) -> bool {
    let path = Path::new(directory);
    !directory.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

impl SyncEngine<'_> {
    /// Copies `<repo>/<directory>` into `temp/<directory>`, replacing what was there.
    pub async fn pull(&self, directory: &str) -> Result<PullReport, AnvilError> {
        if !is_plain_relative(directory) {
            return Err(AnvilError::validation(
                Op::Pull,
                "parse-directory",
                format!("invalid directory '{}': must be a path inside the repository", directory),
            ));
        }

        let settings = self.load(Op::Pull)?;
        let (client, _) = self.client(Op::Pull, &settings)?;

        client
            .validate_repository()
            .await
            .map_err(|e| git_error(Op::Pull, "validate-repository", e))?;
        client
            .ensure_repository_ready()
            .await
            .map_err(|e| git_error(Op::Pull, "prepare-repository", e))?;
        client
            .pull_latest()
            .await
            .map_err(|e| git_error(Op::Pull, "pull-latest", e))?;

        let source = client.local_path().join(directory);
        if !source.exists() {
            return Err(AnvilError::filesystem(
                Op::Pull,
                "locate-directory",
                format!(
                    "directory '{}' does not exist in repository {}",
                    directory,
                    client.repo()
                ),
            ));
        }

        let staged = self.store.paths().staged(directory);
        fsutil::remove_path(&staged)
            .and_then(|_| fsutil::copy_path(&source, &staged))
            .map_err(|e| AnvilError::filesystem(Op::Pull, "copy-directory", e))?;

        let files = fsutil::list_files(&staged)
            .map_err(|e| AnvilError::filesystem(Op::Pull, "list-files", e))?;
        info!(directory, files = files.len(), "pulled");

        Ok(PullReport {
            directory: directory.to_string(),
            repo: client.repo().to_string(),
            branch: client.branch().to_string(),
            staged,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::git::tests::seed_remote;
    use crate::git::GitError;
    use crate::process::command_exists;
    use crate::sync::tests::store_for;
    use crate::sync::SyncEngine;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pull_warnings() {
        let mut settings = Settings::sample();
        settings.git.username = "Alice".to_string();
        settings.git.email = "alice@example.com".to_string();
        assert!(pull_warnings(&settings).is_empty());

        settings.github.branch = "develop".to_string();
        settings.git.email.clear();
        let warnings = pull_warnings(&settings);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("'develop'"));
    }

    #[test]
    fn test_is_plain_relative() {
        assert!(is_plain_relative("cursor"));
        assert!(is_plain_relative("apps/zed"));
        assert!(!is_plain_relative(""));
        assert!(!is_plain_relative("../etc"));
        assert!(!is_plain_relative("/etc"));
    }

    #[tokio::test]
    async fn test_pull_copies_directory_into_temp() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let store = store_for(temp.path(), "main");
        let engine = SyncEngine::new(&store).with_remote_url(format!("file://{}", remote.display()));

        let stale = store.paths().staged("cursor").join("stale.json");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "old").unwrap();

        let report = engine.pull("cursor").await.unwrap();
        assert_eq!(report.files, vec![PathBuf::from("settings.json")]);
        assert_eq!(
            fs::read_to_string(report.staged.join("settings.json")).unwrap(),
            "{}\n"
        );
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_pull_missing_directory_fails_hard() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let store = store_for(temp.path(), "main");
        let engine = SyncEngine::new(&store).with_remote_url(format!("file://{}", remote.display()));

        let err = engine.pull("zed").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileSystem);
        assert!(err.to_string().contains("directory 'zed' does not exist in repository alice/dotfiles"));
        assert!(!store.paths().staged("zed").exists());
    }

    #[tokio::test]
    async fn test_pull_unknown_branch_lists_alternatives() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let store = store_for(temp.path(), "feature-x");
        let engine = SyncEngine::new(&store).with_remote_url(format!("file://{}", remote.display()));

        let err = engine.pull("cursor").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        match err.source.downcast_ref::<GitError>() {
            Some(GitError::BranchNotFound { available, .. }) => {
                let mut available = available.clone().unwrap();
                available.sort();
                assert_eq!(available, vec!["develop", "main"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
