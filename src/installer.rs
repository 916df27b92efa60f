use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::brew::{BrewError, BrewInstall, PackageKind, PackageManager};
use crate::config::{Settings, ToolConfig};
use crate::error::{AnvilError, Op};
use crate::presence::{AppPresenceOracle, Evidence};
use crate::process::Cmd;

pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETRIES: usize = 2;

const OH_MY_ZSH_INSTALL: &str = r#"sh -c "$(curl -fsSL https://raw.github.com/ohmyzsh/ohmyzsh/master/tools/install.sh)" "" --unattended"#;

#[derive(Debug, Clone, Copy)]
pub struct InstallOptions {
    pub dry_run: bool,
    pub workers: usize,
    pub timeout: Duration,
    pub retries: usize,
    /// Attempt `n` waits `n * backoff_unit` before retrying.
    pub backoff_unit: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            workers: default_workers(),
            timeout: DEFAULT_INSTALL_TIMEOUT,
            retries: DEFAULT_RETRIES,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4)
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("timeout installing {tool} after {}s", .after.as_secs())]
    Timeout { tool: String, after: Duration },
    #[error("installation of {tool} was cancelled")]
    Cancelled { tool: String },
    #[error("{tool} was not started: installation cancelled")]
    Skipped { tool: String },
    #[error("failed to install {tool} after {attempts} attempts: {source}")]
    Failed {
        tool: String,
        attempts: usize,
        #[source]
        source: BrewError,
    },
}

impl InstallError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            InstallError::Cancelled { .. } | InstallError::Skipped { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    AlreadyPresent(Evidence),
    WouldInstall,
    Installed { kind: PackageKind, attempts: usize },
    /// Homebrew declined because the bundle already exists in /Applications.
    ExistingApp,
}

#[derive(Debug)]
pub struct InstallResult {
    pub tool: String,
    pub outcome: Result<InstallStatus, InstallError>,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub duration: Duration,
    /// Post-install warnings and instructions.
    pub notes: Vec<String>,
}

impl InstallResult {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// True only when the package manager actually installed something.
    pub fn newly_installed(&self) -> bool {
        matches!(self.outcome, Ok(InstallStatus::Installed { .. }))
    }

    fn skipped(tool: &str) -> Self {
        let now = Local::now();
        Self {
            tool: tool.to_string(),
            outcome: Err(InstallError::Skipped {
                tool: tool.to_string(),
            }),
            started: now,
            finished: now,
            duration: Duration::ZERO,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub wall: Duration,
    pub min: Duration,
    pub avg: Duration,
    pub max: Duration,
    pub workers: usize,
}

impl BatchStats {
    pub fn from_results(results: &[InstallResult], wall: Duration, workers: usize) -> Self {
        let durations: Vec<Duration> = results.iter().map(|r| r.duration).collect();
        let succeeded = results.iter().filter(|r| r.success()).count();
        let total_time: Duration = durations.iter().sum();

        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            wall,
            min: durations.iter().min().copied().unwrap_or_default(),
            avg: if durations.is_empty() {
                Duration::ZERO
            } else {
                total_time / durations.len() as u32
            },
            max: durations.iter().max().copied().unwrap_or_default(),
            workers,
        }
    }

    /// Estimated serial time over wall time. None for a single tool.
    pub fn speedup(&self) -> Option<f64> {
        if self.total < 2 || self.wall.is_zero() {
            return None;
        }
        Some(self.avg.as_secs_f64() * self.total as f64 / self.wall.as_secs_f64())
    }
}

#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<InstallResult>,
    pub stats: BatchStats,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &InstallResult> {
        self.results.iter().filter(|r| !r.success())
    }

    /// The batch-level error, present iff any item failed.
    pub fn error(&self, command: &str) -> Option<AnvilError> {
        (self.stats.failed > 0).then(|| {
            AnvilError::installation(
                Op::Install,
                command,
                format!(
                    "failed to install {} of {} tools",
                    self.stats.failed, self.stats.total
                ),
            )
        })
    }
}

/// Per-tool steps after a fresh install, driven by `tool_configs`.
#[derive(Debug, Clone, Default)]
pub struct PostInstallHooks {
    tool_configs: BTreeMap<String, ToolConfig>,
    git_identity_complete: bool,
}

impl PostInstallHooks {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tool_configs: settings.tool_configs.tools.clone(),
            git_identity_complete: settings.git.is_complete(),
        }
    }

    pub fn dependencies(&self, tool: &str) -> &[String] {
        self.tool_configs
            .get(tool)
            .map(|c| c.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Runs the hooks for `tool` and returns anything the user should see.
    /// Nothing here fails the install.
    pub async fn run(&self, tool: &str, cancel: &CancellationToken) -> Vec<String> {
        let mut notes = Vec::new();
        let config = self.tool_configs.get(tool);

        if tool == "zsh" {
            notes.push("To complete Oh My Zsh setup, run:".to_string());
            notes.push(format!("  {}", OH_MY_ZSH_INSTALL));
        }

        let check_git = tool == "git" && config.map(|c| c.config_check).unwrap_or(true);
        if check_git && !self.git_identity_complete {
            notes.push("Consider configuring git with:".to_string());
            notes.push("  git config --global user.name 'Your Name'".to_string());
            notes.push("  git config --global user.email 'your.email@example.com'".to_string());
        }

        if let Some(config) = config.filter(|c| !c.post_install_script.is_empty()) {
            let script = Cmd::new("sh")
                .args(["-c", config.post_install_script.as_str()])
                .envs(config.environment_setup.clone());
            match script.output(cancel).await {
                Ok(out) if out.success => debug!(tool, "post-install script finished"),
                Ok(out) => notes.push(format!(
                    "Post-install script failed for {}: {}",
                    tool,
                    out.best_message()
                )),
                Err(e) => notes.push(format!("Post-install script failed for {}: {}", tool, e)),
            }
        }

        notes
    }
}

/// Called with each result, the number completed so far, and the batch size.
pub type Progress = Arc<dyn Fn(&InstallResult, usize, usize) + Send + Sync>;

/// Installs tools through the package manager, skipping anything already present.
#[derive(Clone)]
pub struct Installer {
    pm: Arc<dyn PackageManager>,
    oracle: Arc<AppPresenceOracle>,
    hooks: Arc<PostInstallHooks>,
    options: InstallOptions,
    progress: Option<Progress>,
}

impl Installer {
    pub fn new(
        pm: Arc<dyn PackageManager>,
        oracle: Arc<AppPresenceOracle>,
        options: InstallOptions,
    ) -> Self {
        Self {
            pm,
            oracle,
            hooks: Arc::new(PostInstallHooks::default()),
            options,
            progress: None,
        }
    }

    pub fn with_hooks(mut self, hooks: PostInstallHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    pub async fn install_one(&self, tool: &str, cancel: &CancellationToken) -> InstallResult {
        let started = Local::now();
        let clock = Instant::now();

        let outcome = if cancel.is_cancelled() {
            Err(InstallError::Skipped {
                tool: tool.to_string(),
            })
        } else {
            match tokio::time::timeout(self.options.timeout, self.attempt(tool, cancel)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(InstallError::Timeout {
                    tool: tool.to_string(),
                    after: self.options.timeout,
                }),
            }
        };

        let notes = match &outcome {
            Ok(InstallStatus::Installed { .. }) => self.hooks.run(tool, cancel).await,
            _ => Vec::new(),
        };

        if let Err(e) = &outcome {
            warn!(tool, error = %e, "install failed");
        }

        InstallResult {
            tool: tool.to_string(),
            outcome,
            started,
            finished: Local::now(),
            duration: clock.elapsed(),
            notes,
        }
    }

    async fn attempt(
        &self,
        tool: &str,
        cancel: &CancellationToken,
    ) -> Result<InstallStatus, InstallError> {
        let cancelled = || InstallError::Cancelled {
            tool: tool.to_string(),
        };

        match self.oracle.find(tool, cancel).await {
            Ok(Some(evidence)) => return Ok(InstallStatus::AlreadyPresent(evidence)),
            Ok(None) => {}
            Err(_) => return Err(cancelled()),
        }

        if self.options.dry_run {
            return Ok(InstallStatus::WouldInstall);
        }

        let attempts = self.options.retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.options.backoff_unit * (attempt as u32 - 1);
                warn!(tool, attempt, of = attempts, ?backoff, "retrying install");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }

            let kind = match self.pm.classify(tool, cancel).await {
                Ok(kind) => kind,
                Err(e) if e.is_cancelled() => return Err(cancelled()),
                Err(_) => PackageKind::Formula,
            };

            match self.pm.install(tool, kind, cancel).await {
                Ok(BrewInstall::Installed) => {
                    return Ok(InstallStatus::Installed { kind, attempts: attempt })
                }
                Ok(BrewInstall::ExistingApp) => return Ok(InstallStatus::ExistingApp),
                Err(e) if e.is_cancelled() => return Err(cancelled()),
                Err(e) => {
                    debug!(tool, attempt, error = %e, "install attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(InstallError::Failed {
            tool: tool.to_string(),
            attempts,
            source: last_error.unwrap_or(BrewError::NotInstalled),
        })
    }

    /// Installs with at most `workers` tools in flight. Completion order is unspecified.
    pub async fn install_batch(
        &self,
        tools: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AnvilError> {
        if tools.is_empty() {
            return Err(AnvilError::installation(
                Op::Install,
                "concurrent",
                "no tools provided for installation",
            ));
        }

        let clock = Instant::now();
        let total = tools.len();
        let workers = self.options.workers.clamp(1, total);

        let (job_tx, job_rx) = mpsc::channel::<String>(total);
        for tool in tools {
            if job_tx.send(tool.clone()).await.is_err() {
                break;
            }
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<InstallResult>(total);
        let mut handles = Vec::with_capacity(workers);

        for worker in 1..=workers {
            let installer = self.clone();
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let cancel = cancel.child_token();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some(tool) = next else { break };

                    debug!(worker, tool = %tool, "picked up");
                    let result = if cancel.is_cancelled() {
                        InstallResult::skipped(&tool)
                    } else {
                        installer.install_one(&tool, &cancel).await
                    };
                    if results.send(result).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            if let Some(progress) = &self.progress {
                progress(&result, results.len() + 1, total);
            }
            results.push(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "install worker panicked");
            }
        }

        let stats = BatchStats::from_results(&results, clock.elapsed(), workers);
        Ok(BatchReport { results, stats })
    }

    /// Installs one at a time in declaration order, each tool's configured
    /// dependencies first.
    pub async fn install_serial(
        &self,
        tools: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchReport, AnvilError> {
        if tools.is_empty() {
            return Err(AnvilError::installation(
                Op::Install,
                "serial",
                "no tools provided for installation",
            ));
        }

        let clock = Instant::now();
        let order = self.with_dependencies(tools);
        let total = order.len();
        let mut results = Vec::with_capacity(total);

        for tool in &order {
            let result = self.install_one(tool, cancel).await;
            if let Some(progress) = &self.progress {
                progress(&result, results.len() + 1, total);
            }
            results.push(result);
        }

        let stats = BatchStats::from_results(&results, clock.elapsed(), 1);
        Ok(BatchReport { results, stats })
    }

    fn with_dependencies(&self, tools: &[String]) -> Vec<String> {
        fn visit(
            tool: &str,
            hooks: &PostInstallHooks,
            seen: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) {
            if !seen.insert(tool.to_string()) {
                return;
            }
            for dep in hooks.dependencies(tool) {
                visit(dep, hooks, seen, order);
            }
            order.push(tool.to_string());
        }

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        for tool in tools {
            visit(tool, &self.hooks, &mut seen, &mut order);
        }
        order
    }
}

/// Order-preserving dedup; returns the kept list and the removed duplicates.
pub fn dedup_tools(tools: &[String]) -> (Vec<String>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(tools.len());
    let mut removed = Vec::new();
    for tool in tools {
        if seen.insert(tool.as_str()) {
            kept.push(tool.clone());
        } else {
            removed.push(tool.clone());
        }
    }
    (kept, removed)
}
