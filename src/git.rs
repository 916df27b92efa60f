use chrono::{DateTime, Local};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{expand, GitHubSettings, GitSettings};
use crate::fsutil;
use crate::process::{Cmd, Output, ProcessError};

/// Injected into every git child so that nothing can block on a prompt.
pub const NON_INTERACTIVE_ENV: [(&str, &str); 4] = [
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_ASKPASS", "/bin/false"),
    ("SSH_ASKPASS", "/bin/false"),
    (
        "GIT_SSH_COMMAND",
        "ssh -o BatchMode=yes -o StrictHostKeyChecking=no",
    ),
];

pub const CLONE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const BRANCH_PREFIX: &str = "config-push";

/// Largest change, in `+`/`-` marks, for which the full diff is shown.
const SMALL_DIFF_MARKS: usize = 50;

static FILES_CHANGED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) files? changed").expect("valid regex"));

#[derive(Debug, Error)]
pub enum GitError {
    #[error("{}", branch_not_found_message(.repo, .branch, .available))]
    BranchNotFound {
        repo: String,
        branch: String,
        /// None when the remote could not be listed.
        available: Option<Vec<String>>,
    },
    #[error("cannot access repository {repo}: {message}")]
    Unreachable { repo: String, message: String },
    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },
    #[error("local repository at {} is not valid or doesn't exist", .0.display())]
    NotARepository(PathBuf),
    #[error("no changes to commit")]
    NothingToCommit,
    #[error("{path} has local changes in the working copy that a preview would discard: {}", .entries.join(", "))]
    DirtyPath { path: String, entries: Vec<String> },
    #[error("{0:#}")]
    Filesystem(anyhow::Error),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

fn branch_not_found_message(repo: &str, branch: &str, available: &Option<Vec<String>>) -> String {
    let listing = match available {
        None => "Could not retrieve available branches. Check repository access.".to_string(),
        Some(branches) if branches.is_empty() => "No branches found in the repository.".to_string(),
        Some(branches) => format!(
            "Available branches in repository:\n    - {}",
            branches.join("\n    - ")
        ),
    };

    format!(
        "Branch Configuration Error\n\n\
         The branch '{branch}' does not exist in repository '{repo}'.\n\n\
         {listing}\n\n\
         To fix this issue:\n  \
         1. Edit your settings.yaml file (usually at ~/.anvil/settings.yaml)\n  \
         2. Update the 'github.branch' field to match an existing branch\n  \
         3. Or create the branch '{branch}' in your repository\n\n\
         Example settings.yaml section:\n  \
         github:\n    \
         config_repo: \"{repo}\"\n    \
         branch: \"main\""
    )
}

/// How the remote is reached. The token is read from the environment and never stored.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub token: Option<String>,
    pub ssh_key: Option<PathBuf>,
}

impl Credentials {
    pub fn from_settings(github: &GitHubSettings, git: &GitSettings) -> Self {
        let token = std::env::var(&github.token_env_var)
            .ok()
            .filter(|t| !t.trim().is_empty());
        let ssh_key = Some(expand(&git.ssh_key_path))
            .filter(|_| !git.ssh_key_path.is_empty())
            .filter(|p| p.exists());
        Self { token, ssh_key }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.ssh_key.is_none()
    }

    /// Token over HTTPS, then SSH, then anonymous HTTPS.
    pub fn clone_url(&self, repo: &str) -> String {
        if let Some(token) = &self.token {
            format!("https://{}@github.com/{}.git", token, repo)
        } else if self.ssh_key.is_some() {
            format!("git@github.com:{}.git", repo)
        } else {
            format!("https://github.com/{}.git", repo)
        }
    }
}

/// Result of the pre-flight diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub stat: String,
    pub full_diff: Option<String>,
    pub files_changed: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.files_changed == 0
    }
}

pub fn extract_file_count(stat: &str) -> usize {
    FILES_CHANGED
        .captures(stat)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0)
}

pub fn is_single_small_file(stat: &str) -> bool {
    extract_file_count(stat) == 1
        && stat.matches('+').count() + stat.matches('-').count() <= SMALL_DIFF_MARKS
}

/// `config-push-DDMMYYYY-HHMM` in local time.
pub fn branch_name_at(now: DateTime<Local>) -> String {
    format!("{}-{}", BRANCH_PREFIX, now.format("%d%m%Y-%H%M"))
}

/// Non-interactive git operations against one remote and one working copy.
#[derive(Debug, Clone)]
pub struct GitClient {
    repo: String,
    branch: String,
    local_path: PathBuf,
    remote_url: String,
    author: Option<(String, String)>,
    cancel: CancellationToken,
}

impl GitClient {
    pub fn new(github: &GitHubSettings, git: &GitSettings, credentials: &Credentials) -> Self {
        let author = git
            .is_complete()
            .then(|| (git.username.clone(), git.email.clone()));
        Self {
            repo: github.config_repo.clone(),
            branch: github.branch.clone(),
            local_path: github.expanded_local_path(),
            remote_url: credentials.clone_url(&github.config_repo),
            author,
            cancel: CancellationToken::new(),
        }
    }

    /// Points the client at an explicit remote, such as a `file://` URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = url.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn repository_url(&self) -> String {
        format!("https://github.com/{}", self.repo)
    }

    pub fn compare_url(&self, new_branch: &str) -> String {
        format!(
            "https://github.com/{}/compare/{}...{}",
            self.repo, self.branch, new_branch
        )
    }

    fn remote_cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new("git").args(args).envs(NON_INTERACTIVE_ENV)
    }

    fn local_cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remote_cmd(args).current_dir(&self.local_path)
    }

    async fn run(&self, cmd: Cmd) -> Result<Output, GitError> {
        let out = cmd.output(&self.cancel).await?;
        if !out.success {
            return Err(GitError::CommandFailed {
                command: cmd.display().trim_start_matches("git ").to_string(),
                message: out.best_message().to_string(),
            });
        }
        Ok(out)
    }

    pub async fn list_remote_branches(&self) -> Result<Vec<String>, GitError> {
        let out = self
            .remote_cmd(["ls-remote", "--heads", self.remote_url.as_str()])
            .output(&self.cancel)
            .await?;
        if !out.success {
            return Err(GitError::Unreachable {
                repo: self.repo.clone(),
                message: out.best_message().to_string(),
            });
        }

        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .filter_map(|r| r.strip_prefix("refs/heads/"))
            .map(str::to_string)
            .collect())
    }

    /// Remote reachable and configured branch present.
    pub async fn validate_repository(&self) -> Result<(), GitError> {
        let head = self
            .remote_cmd(["ls-remote", self.remote_url.as_str(), "HEAD"])
            .output(&self.cancel)
            .await?;
        if !head.success {
            return Err(GitError::Unreachable {
                repo: self.repo.clone(),
                message: head.best_message().to_string(),
            });
        }

        let branches = self.list_remote_branches().await;
        match branches {
            Ok(branches) if branches.iter().any(|b| *b == self.branch) => Ok(()),
            Ok(branches) => Err(GitError::BranchNotFound {
                repo: self.repo.clone(),
                branch: self.branch.clone(),
                available: Some(branches),
            }),
            Err(GitError::Process(e)) => Err(GitError::Process(e)),
            Err(_) => Err(GitError::BranchNotFound {
                repo: self.repo.clone(),
                branch: self.branch.clone(),
                available: None,
            }),
        }
    }

    pub async fn is_working_copy(&self) -> bool {
        if !self.local_path.join(".git").exists() {
            return false;
        }
        matches!(
            self.local_cmd(["rev-parse", "--is-inside-work-tree"])
                .output(&self.cancel)
                .await,
            Ok(out) if out.success
        )
    }

    pub async fn clone_repository(&self) -> Result<(), GitError> {
        if let Some(parent) = self.local_path.parent() {
            fsutil::ensure_dir(parent).map_err(GitError::Filesystem)?;
        }

        info!(repo = %self.repo, path = %self.local_path.display(), "cloning");
        let local = self.local_path.display().to_string();
        let cmd = self
            .remote_cmd([
                "clone",
                "--branch",
                self.branch.as_str(),
                self.remote_url.as_str(),
                local.as_str(),
            ])
            .timeout(CLONE_TIMEOUT);
        self.run(cmd).await?;

        if !self.is_working_copy().await {
            return Err(GitError::NotARepository(self.local_path.clone()));
        }
        Ok(())
    }

    /// Clones when missing; otherwise refreshes the remote URL, checks out the
    /// configured branch, fast-forwards it and clears leftovers from earlier runs.
    pub async fn ensure_repository_ready(&self) -> Result<(), GitError> {
        if !self.is_working_copy().await {
            return self.clone_repository().await;
        }

        self.run(self.local_cmd(["remote", "set-url", "origin", self.remote_url.as_str()]))
            .await?;
        self.run(self.local_cmd(["fetch", "origin"])).await?;
        self.run(self.local_cmd(["checkout", self.branch.as_str()]))
            .await?;
        self.pull_latest().await?;
        self.ensure_clean_state().await
    }

    pub async fn pull_latest(&self) -> Result<(), GitError> {
        if !self.is_working_copy().await {
            return Err(GitError::NotARepository(self.local_path.clone()));
        }
        self.run(self.local_cmd(["fetch", "origin", self.branch.as_str()]))
            .await?;
        self.run(self.local_cmd(["pull", "--ff-only", "origin", self.branch.as_str()]))
            .await?;
        Ok(())
    }

    async fn ensure_clean_state(&self) -> Result<(), GitError> {
        let staged = self
            .local_cmd(["diff", "--cached", "--quiet"])
            .output(&self.cancel)
            .await?;
        if !staged.success {
            debug!("resetting staged changes");
            self.run(self.local_cmd(["reset", "-q", "HEAD"])).await?;
        }

        let status = self.run(self.local_cmd(["status", "--porcelain"])).await?;
        if !status.stdout_trimmed().is_empty() {
            debug!("discarding working copy leftovers");
            self.run(self.local_cmd(["checkout", "--", "."])).await?;
            self.run(self.local_cmd(["clean", "-fdq"])).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn current_branch(&self) -> Result<String, GitError> {
        let out = self
            .run(self.local_cmd(["rev-parse", "--abbrev-ref", "HEAD"]))
            .await?;
        Ok(out.stdout_trimmed().to_string())
    }

    pub async fn create_and_checkout_branch(&self, name: &str) -> Result<(), GitError> {
        self.run(self.local_cmd(["checkout", "-b", name])).await?;
        info!(branch = name, "created branch");
        Ok(())
    }

    pub async fn stage(&self, path: &str) -> Result<(), GitError> {
        self.run(self.local_cmd(["add", "-A", "--", path])).await?;
        Ok(())
    }

    /// Commits whatever is staged, authored as the configured git identity.
    pub async fn commit_all(&self, message: &str) -> Result<(), GitError> {
        let staged = self
            .local_cmd(["diff", "--cached", "--quiet"])
            .output(&self.cancel)
            .await?;
        if staged.success {
            return Err(GitError::NothingToCommit);
        }

        let mut args = Vec::new();
        if let Some((name, email)) = &self.author {
            args.extend([
                "-c".to_string(),
                format!("user.name={}", name),
                "-c".to_string(),
                format!("user.email={}", email),
            ]);
        }
        args.extend(["commit".to_string(), "-m".to_string(), message.to_string()]);

        self.run(self.local_cmd(args)).await?;
        info!(message, "committed");
        Ok(())
    }

    /// Pushes `name` to origin and returns what the remote printed.
    pub async fn push_branch(&self, name: &str) -> Result<String, GitError> {
        let out = self
            .run(self.local_cmd(["push", "--set-upstream", "origin", name]))
            .await?;
        Ok(format!("{}{}", out.stdout, out.stderr).trim().to_string())
    }

    /// Files touched by the last commit, relative to the repository root.
    pub async fn last_commit_files(&self) -> Result<Vec<String>, GitError> {
        let out = self
            .run(self.local_cmd(["show", "--name-only", "--pretty=format:", "HEAD"]))
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `git status --porcelain` lines under `path`, untracked files included.
    pub async fn local_changes(&self, path: &str) -> Result<Vec<String>, GitError> {
        let out = self
            .run(self.local_cmd([
                "status",
                "--porcelain",
                "--untracked-files=all",
                "--",
                path,
            ]))
            .await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Copies `source` to `dest` (relative to the working copy) without staging.
    pub fn apply(&self, source: &Path, dest: &str) -> Result<(), GitError> {
        fsutil::copy_path(source, &self.local_path.join(dest)).map_err(GitError::Filesystem)
    }

    /// Diffs `source` against `dest` in the working copy and leaves the working
    /// copy exactly as it was found. Refuses to run when `dest` already has
    /// uncommitted or untracked changes, since the restore resets the path to HEAD.
    pub async fn stage_and_diff_stat(
        &self,
        source: &Path,
        dest: &str,
    ) -> Result<DiffSummary, GitError> {
        let entries = self.local_changes(dest).await?;
        if !entries.is_empty() {
            return Err(GitError::DirtyPath {
                path: dest.to_string(),
                entries,
            });
        }
        let guard = PreviewGuard::begin(self, dest);

        self.apply(source, dest)?;
        self.stage(dest).await?;

        let stat = self
            .run(self.local_cmd(["diff", "--cached", "--stat", "--stat-width=80", "--", dest]))
            .await?
            .stdout;

        let full_diff = if is_single_small_file(&stat) {
            let out = self
                .run(self.local_cmd(["diff", "--cached", "--no-color", "--", dest]))
                .await?;
            Some(out.stdout)
        } else {
            None
        };

        guard.restore().await?;

        Ok(DiffSummary {
            files_changed: extract_file_count(&stat),
            stat,
            full_diff,
        })
    }
}

/// Undoes preview mutations under one path. Restores asynchronously on the
/// normal path and synchronously from `Drop` on every other exit.
struct PreviewGuard<'a> {
    client: &'a GitClient,
    path: String,
    armed: bool,
}

impl<'a> PreviewGuard<'a> {
    fn begin(client: &'a GitClient, path: &str) -> Self {
        Self {
            client,
            path: path.to_string(),
            armed: true,
        }
    }

    fn steps(&self) -> [Vec<&str>; 3] {
        [
            vec!["reset", "-q", "HEAD", "--", &self.path],
            vec!["checkout", "--", &self.path],
            vec!["clean", "-fdq", "--", &self.path],
        ]
    }

    async fn restore(mut self) -> Result<(), GitError> {
        self.armed = false;
        // checkout fails with a pathspec error when dest is new; that is fine
        for step in self.steps() {
            let out = self
                .client
                .local_cmd(step.clone())
                .output(&CancellationToken::new())
                .await?;
            if !out.success {
                debug!(step = ?step, error = out.stderr_trimmed(), "restore step skipped");
            }
        }
        Ok(())
    }
}

impl Drop for PreviewGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(path = %self.path, "preview interrupted, restoring working copy");
        for step in self.steps() {
            let status = std::process::Command::new("git")
                .args(&step)
                .current_dir(&self.client.local_path)
                .envs(NON_INTERACTIVE_ENV)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status();
            if let Err(e) = status {
                warn!(error = %e, "failed to restore working copy");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::process::command_exists;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    pub(crate) async fn git(dir: &Path, args: &[&str]) -> Output {
        let out = Cmd::new("git")
            .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
            .args(args.iter().copied())
            .current_dir(dir)
            .envs([
                ("GIT_AUTHOR_NAME", "Test"),
                ("GIT_AUTHOR_EMAIL", "test@example.com"),
                ("GIT_COMMITTER_NAME", "Test"),
                ("GIT_COMMITTER_EMAIL", "test@example.com"),
            ])
            .run()
            .await
            .unwrap();
        assert!(out.success, "git {:?} failed: {}", args, out.stderr);
        out
    }

    /// Bare remote on `main` (plus `develop`) holding `anvil/settings.yaml`.
    pub(crate) async fn seed_remote(temp: &Path) -> PathBuf {
        seed_remote_with(
            temp,
            &[
                ("anvil/settings.yaml", "version: 1.0.0\n"),
                ("cursor/settings.json", "{}\n"),
            ],
        )
        .await
    }

    pub(crate) async fn seed_remote_with(temp: &Path, files: &[(&str, &str)]) -> PathBuf {
        let seed = temp.join("seed");
        let remote = temp.join("remote.git");
        fs::create_dir_all(&seed).unwrap();
        fs::create_dir_all(&remote).unwrap();

        git(&seed, &["init", "-q"]).await;
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
        for (path, content) in files {
            let target = seed.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        git(&seed, &["add", "."]).await;
        git(&seed, &["commit", "-q", "-m", "seed"]).await;

        git(&remote, &["init", "-q", "--bare"]).await;
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]).await;
        let url = format!("file://{}", remote.display());
        git(&seed, &["push", "-q", &url, "main", "main:develop"]).await;
        remote
    }

    pub(crate) fn client_for(remote: &Path, local: &Path, branch: &str) -> GitClient {
        let github = GitHubSettings {
            config_repo: "alice/dotfiles".to_string(),
            branch: branch.to_string(),
            local_path: local.display().to_string(),
            token_env_var: "ANVIL_TEST_NO_TOKEN".to_string(),
        };
        let identity = GitSettings {
            username: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            ssh_key_path: String::new(),
        };
        GitClient::new(&github, &identity, &Credentials::default())
            .with_remote_url(format!("file://{}", remote.display()))
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                (
                    e.path().strip_prefix(root).unwrap().to_path_buf(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_extract_file_count() {
        assert_eq!(extract_file_count(""), 0);
        assert_eq!(
            extract_file_count(" a | 2 +-\n 1 file changed, 1 insertion(+), 1 deletion(-)\n"),
            1
        );
        assert_eq!(extract_file_count(" 12 files changed, 40 insertions(+)"), 12);
    }

    #[test]
    fn test_is_single_small_file() {
        assert!(is_single_small_file(
            " anvil/settings.yaml | 2 +-\n 1 file changed, 1 insertion(+), 1 deletion(-)\n"
        ));
        let big = format!(" a | 60 {}\n 1 file changed", "+".repeat(60));
        assert!(!is_single_small_file(&big));
        assert!(!is_single_small_file(" 2 files changed"));
    }

    #[test]
    fn test_branch_name_format() {
        let at = Local.with_ymd_and_hms(2025, 3, 14, 9, 7, 0).unwrap();
        assert_eq!(branch_name_at(at), "config-push-14032025-0907");
    }

    #[test]
    fn test_clone_url_preference() {
        let token = Credentials {
            token: Some("ghp_x".to_string()),
            ssh_key: Some(PathBuf::from("/k")),
        };
        assert_eq!(token.clone_url("a/b"), "https://ghp_x@github.com/a/b.git");

        let ssh = Credentials {
            token: None,
            ssh_key: Some(PathBuf::from("/k")),
        };
        assert_eq!(ssh.clone_url("a/b"), "git@github.com:a/b.git");
        assert_eq!(Credentials::default().clone_url("a/b"), "https://github.com/a/b.git");
    }

    #[test]
    fn test_branch_not_found_lists_branches() {
        let err = GitError::BranchNotFound {
            repo: "alice/dotfiles".to_string(),
            branch: "feature-x".to_string(),
            available: Some(vec!["main".to_string(), "develop".to_string()]),
        };
        let message = err.to_string();
        assert!(message.contains("The branch 'feature-x' does not exist in repository 'alice/dotfiles'"));
        assert!(message.contains("    - main\n    - develop"));
    }

    #[test]
    fn test_compare_url() {
        let client = client_for(Path::new("/r"), Path::new("/l"), "main");
        assert_eq!(
            client.compare_url("config-push-14032025-0907"),
            "https://github.com/alice/dotfiles/compare/main...config-push-14032025-0907"
        );
    }

    #[tokio::test]
    async fn test_validate_repository_branch_mismatch() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;

        let ok = client_for(&remote, &temp.path().join("wc"), "develop");
        ok.validate_repository().await.unwrap();

        let bad = client_for(&remote, &temp.path().join("wc"), "feature-x");
        match bad.validate_repository().await.unwrap_err() {
            GitError::BranchNotFound { available, .. } => {
                let mut available = available.unwrap();
                available.sort();
                assert_eq!(available, vec!["develop", "main"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_ready_clones_then_refreshes() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");

        client.ensure_repository_ready().await.unwrap();
        assert!(local.join("anvil/settings.yaml").exists());

        client.create_and_checkout_branch("scratch").await.unwrap();
        fs::write(local.join("stray.txt"), "x").unwrap();

        client.ensure_repository_ready().await.unwrap();
        assert_eq!(client.current_branch().await.unwrap(), "main");
        assert!(!local.join("stray.txt").exists());
    }

    #[tokio::test]
    async fn test_preview_leaves_working_copy_untouched() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");
        client.ensure_repository_ready().await.unwrap();

        fs::write(local.join("notes.txt"), "untracked\n").unwrap();
        let before = snapshot(&local);
        let status_before = git(&local, &["status", "--porcelain"]).await.stdout;

        let source = temp.path().join("settings.yaml");
        fs::write(&source, "version: 1.1.0\n").unwrap();
        let summary = client
            .stage_and_diff_stat(&source, "anvil/settings.yaml")
            .await
            .unwrap();

        assert_eq!(summary.files_changed, 1);
        assert!(summary.stat.contains("anvil/settings.yaml"));
        assert!(summary.full_diff.unwrap().contains("+version: 1.1.0"));
        assert_eq!(snapshot(&local), before);
        assert_eq!(git(&local, &["status", "--porcelain"]).await.stdout, status_before);
    }

    #[tokio::test]
    async fn test_preview_of_new_directory_is_cleaned() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");
        client.ensure_repository_ready().await.unwrap();
        let before = snapshot(&local);

        let source = temp.path().join("zed");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.json"), "{}\n").unwrap();
        fs::write(source.join("b.json"), "[]\n").unwrap();

        let summary = client.stage_and_diff_stat(&source, "zed").await.unwrap();
        assert_eq!(summary.files_changed, 2);
        assert!(summary.full_diff.is_none());
        assert_eq!(snapshot(&local), before);
        assert!(!local.join("zed").exists());
    }

    #[tokio::test]
    async fn test_preview_refuses_path_with_local_changes() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");
        client.ensure_repository_ready().await.unwrap();

        fs::write(local.join("anvil/notes.txt"), "keep me\n").unwrap();
        fs::write(local.join("anvil/settings.yaml"), "version: 9.9.9\n").unwrap();
        let before = snapshot(&local);

        let source = temp.path().join("settings.yaml");
        fs::write(&source, "version: 1.1.0\n").unwrap();
        match client.stage_and_diff_stat(&source, "anvil").await.unwrap_err() {
            GitError::DirtyPath { path, entries } => {
                assert_eq!(path, "anvil");
                assert_eq!(entries.len(), 2, "{entries:?}");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(snapshot(&local), before);
        assert_eq!(
            fs::read_to_string(local.join("anvil/settings.yaml")).unwrap(),
            "version: 9.9.9\n"
        );
        assert!(local.join("anvil/notes.txt").exists());
    }

    #[tokio::test]
    async fn test_preview_identical_is_empty() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");
        client.ensure_repository_ready().await.unwrap();

        let source = temp.path().join("settings.yaml");
        fs::write(&source, "version: 1.0.0\n").unwrap();
        let summary = client
            .stage_and_diff_stat(&source, "anvil/settings.yaml")
            .await
            .unwrap();
        assert!(summary.is_empty());
    }

    #[tokio::test]
    async fn test_commit_and_push_branch() {
        if !command_exists("git") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let remote = seed_remote(temp.path()).await;
        let local = temp.path().join("wc");
        let client = client_for(&remote, &local, "main");
        client.ensure_repository_ready().await.unwrap();

        assert!(matches!(
            client.commit_all("anvil[push]: anvil").await,
            Err(GitError::NothingToCommit)
        ));

        client.create_and_checkout_branch("config-push-01012025-0000").await.unwrap();
        let source = temp.path().join("settings.yaml");
        fs::write(&source, "version: 2.0.0\n").unwrap();
        client.apply(&source, "anvil/settings.yaml").unwrap();
        client.stage("anvil/settings.yaml").await.unwrap();
        client.commit_all("anvil[push]: anvil").await.unwrap();
        client.push_branch("config-push-01012025-0000").await.unwrap();

        assert_eq!(
            client.last_commit_files().await.unwrap(),
            vec!["anvil/settings.yaml"]
        );

        let log = git(&remote, &["log", "-1", "--format=%s%n%an", "config-push-01012025-0000"]).await;
        assert_eq!(log.stdout, "anvil[push]: anvil\nAlice\n");
    }
}
