//! Health checks for the anvil environment.
//!
//! Validators are registered by name and grouped into four categories. The
//! engine runs one check, one category or all of them, each sequentially and
//! under a time budget, and applies fixes only when explicitly asked to.

mod configuration;
mod connectivity;
mod dependencies;
mod environment;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::brew::{Homebrew, PackageManager};
use crate::config::{ConfigStore, Settings};
use crate::git::{Credentials, GitClient};
use crate::presence::{AppPresenceOracle, SystemHost};
use crate::sync::{GitHubVisibility, RepoVisibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Environment,
    Dependencies,
    Configuration,
    Connectivity,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Environment,
        Category::Dependencies,
        Category::Configuration,
        Category::Connectivity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Environment => "environment",
            Category::Dependencies => "dependencies",
            Category::Configuration => "configuration",
            Category::Connectivity => "connectivity",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub category: Category,
    pub status: Status,
    pub message: String,
    pub details: Vec<String>,
    pub fix_hint: String,
    pub auto_fix: bool,
}

impl CheckResult {
    pub fn new(
        name: impl Into<String>,
        category: Category,
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            status,
            message: message.into(),
            details: Vec::new(),
            fix_hint: String::new(),
            auto_fix: false,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }

    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = hint.into();
        self
    }

    pub fn fixable(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    pub fn is_fail(&self) -> bool {
        self.status == Status::Fail
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn from_results(results: &[CheckResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            match result.status {
                Status::Pass => summary.passed += 1,
                Status::Warn => summary.warned += 1,
                Status::Fail => summary.failed += 1,
                Status::Skip => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Everything a validator may probe.
pub struct DoctorContext<'a> {
    pub store: &'a ConfigStore,
    pub pm: Arc<dyn PackageManager>,
    pub oracle: Arc<AppPresenceOracle>,
    pub visibility: Arc<dyn RepoVisibility>,
    pub home: PathBuf,
    pub cancel: CancellationToken,
    remote_url: Option<String>,
}

impl<'a> DoctorContext<'a> {
    pub fn new(store: &'a ConfigStore, home: PathBuf, cancel: CancellationToken) -> Self {
        let pm: Arc<dyn PackageManager> = Arc::new(Homebrew::new());
        let oracle = Arc::new(AppPresenceOracle::new(Arc::clone(&pm), Arc::new(SystemHost)));
        Self {
            store,
            pm,
            oracle,
            visibility: Arc::new(GitHubVisibility),
            home,
            cancel,
            remote_url: None,
        }
    }

    #[cfg(test)]
    pub fn with_package_manager(
        mut self,
        pm: Arc<dyn PackageManager>,
        oracle: Arc<AppPresenceOracle>,
    ) -> Self {
        self.pm = pm;
        self.oracle = oracle;
        self
    }

    #[cfg(test)]
    pub fn with_visibility(mut self, visibility: Arc<dyn RepoVisibility>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Overrides the GitHub remote, e.g. with a `file://` URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn settings(&self) -> Result<Settings> {
        self.store.load()
    }

    pub fn git_client(&self, settings: &Settings) -> (GitClient, Credentials) {
        let credentials = Credentials::from_settings(&settings.github, &settings.git);
        let mut client = GitClient::new(&settings.github, &settings.git, &credentials)
            .with_cancel(self.cancel.clone());
        if let Some(url) = &self.remote_url {
            client = client.with_remote_url(url.clone());
        }
        (client, credentials)
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> Category;
    fn description(&self) -> &'static str;

    fn can_fix(&self) -> bool {
        false
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult;

    async fn fix(&self, _ctx: &DoctorContext<'_>) -> Result<()> {
        bail!("check '{}' cannot be fixed automatically", self.name())
    }

    fn report(&self, status: Status, message: &str) -> CheckResult {
        CheckResult::new(self.name(), self.category(), status, message)
    }
}

/// Validators in registration order, unique by name.
#[derive(Default)]
pub struct Registry {
    validators: Vec<Box<dyn Validator>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        environment::register(&mut registry);
        dependencies::register(&mut registry);
        configuration::register(&mut registry);
        connectivity::register(&mut registry);
        registry
    }

    /// Adds `validator`, replacing any registered under the same name.
    pub fn register(&mut self, validator: Box<dyn Validator>) {
        match self
            .validators
            .iter()
            .position(|v| v.name() == validator.name())
        {
            Some(i) => self.validators[i] = validator,
            None => self.validators.push(validator),
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Validator> {
        self.validators
            .iter()
            .find(|v| v.name() == name)
            .map(|v| v.as_ref())
    }

    pub fn by_category(&self, category: Category) -> Vec<&dyn Validator> {
        self.validators
            .iter()
            .filter(|v| v.category() == category)
            .map(|v| v.as_ref())
            .collect()
    }

    /// Every validator, grouped by category in display order.
    pub fn all(&self) -> Vec<&dyn Validator> {
        Category::ALL
            .into_iter()
            .flat_map(|c| self.by_category(c))
            .collect()
    }

    /// Categories that have at least one validator, each with its checks.
    pub fn list(&self) -> Vec<(Category, Vec<&dyn Validator>)> {
        Category::ALL
            .into_iter()
            .map(|c| (c, self.by_category(c)))
            .filter(|(_, v)| !v.is_empty())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub check: Duration,
    pub category: Duration,
    pub all: Duration,
    pub fix: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            check: Duration::from_secs(30),
            category: Duration::from_secs(60),
            all: Duration::from_secs(120),
            fix: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    AlreadyPassing,
    NotFixable(CheckResult),
    /// The re-run no longer fails.
    Fixed(CheckResult),
    StillFailing(CheckResult),
    Failed(String),
}

impl FixOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, FixOutcome::Fixed(_) | FixOutcome::AlreadyPassing)
    }
}

/// Name reported when the settings file cannot be loaded.
pub const CONFIG_LOAD: &str = "config-load";

/// Called with each result, the number completed so far, and the total.
pub type Progress<'p> = &'p (dyn Fn(&CheckResult, usize, usize) + Send + Sync);

pub struct Doctor<'a> {
    ctx: DoctorContext<'a>,
    registry: Registry,
    timeouts: Timeouts,
}

impl<'a> Doctor<'a> {
    pub fn new(ctx: DoctorContext<'a>) -> Self {
        Self::with_registry(ctx, Registry::with_defaults())
    }

    pub fn with_registry(ctx: DoctorContext<'a>, registry: Registry) -> Self {
        Self {
            ctx,
            registry,
            timeouts: Timeouts::default(),
        }
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// A failed settings load short-circuits every run.
    fn config_load_failure(&self, name: &str, category: Category) -> Option<CheckResult> {
        let err = self.ctx.store.load().err()?;
        Some(
            CheckResult::new(name, category, Status::Fail, "Failed to load configuration")
                .with_detail(format!("{:#}", err))
                .with_fix_hint("Run 'anvil init' to initialize your environment"),
        )
    }

    async fn run_one(&self, validator: &dyn Validator, limit: Duration) -> CheckResult {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => validator
                .report(Status::Fail, "Check cancelled"),
            outcome = tokio::time::timeout(limit, validator.validate(&self.ctx)) => match outcome {
                Ok(result) => result,
                Err(_) => validator
                    .report(Status::Fail, &format!("Check timed out after {}s", limit.as_secs()))
                    .with_fix_hint("Re-run the check on its own to see if the problem persists"),
            },
        };
        debug!(
            check = validator.name(),
            status = %result.status,
            elapsed = ?started.elapsed(),
            "check finished"
        );
        result
    }

    async fn run_sequence(
        &self,
        validators: &[&dyn Validator],
        budget: Duration,
        progress: Option<Progress<'_>>,
    ) -> Vec<CheckResult> {
        let deadline = Instant::now() + budget;
        let total = validators.len();
        let mut results = Vec::with_capacity(total);

        for validator in validators {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = if remaining.is_zero() {
                validator.report(Status::Fail, "Not run: doctor time limit reached")
            } else {
                self.run_one(*validator, remaining.min(self.timeouts.check))
                    .await
            };
            if let Some(progress) = progress {
                progress(&result, results.len() + 1, total);
            }
            results.push(result);
        }
        results
    }

    pub async fn run_check(&self, name: &str) -> Result<CheckResult> {
        let Some(validator) = self.registry.get(name) else {
            bail!(
                "Check '{}' not found. Use 'anvil doctor --list' to see available checks",
                name
            );
        };
        if let Some(failure) = self.config_load_failure(name, validator.category()) {
            return Ok(failure);
        }
        Ok(self.run_one(validator, self.timeouts.check).await)
    }

    pub async fn run_category(
        &self,
        category: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<Vec<CheckResult>> {
        let validators = Category::parse(category)
            .map(|c| self.registry.by_category(c))
            .unwrap_or_default();
        let Some(first) = validators.first() else {
            bail!(
                "Category '{}' not found. Use 'anvil doctor --list' to see available categories",
                category
            );
        };
        if let Some(failure) = self.config_load_failure(CONFIG_LOAD, first.category()) {
            return Ok(vec![failure]);
        }
        Ok(self
            .run_sequence(&validators, self.timeouts.category, progress)
            .await)
    }

    pub async fn run_all(&self, progress: Option<Progress<'_>>) -> Vec<CheckResult> {
        if let Some(failure) = self.config_load_failure(CONFIG_LOAD, Category::Environment) {
            return vec![failure];
        }
        let validators = self.registry.all();
        self.run_sequence(&validators, self.timeouts.all, progress)
            .await
    }

    /// Fixable validators selected by a check name, a category, or everything.
    pub fn fix_candidates(&self, scope: Option<&str>) -> Result<Vec<&dyn Validator>> {
        let selected = match scope {
            None => self.registry.all(),
            Some(name) => match (self.registry.get(name), Category::parse(name)) {
                (Some(v), _) => vec![v],
                (None, Some(c)) => self.registry.by_category(c),
                (None, None) => bail!("Check or category '{}' not found", name),
            },
        };
        Ok(selected.into_iter().filter(|v| v.can_fix()).collect())
    }

    /// Runs the fix for `name` and re-verifies it. Does not validate first.
    pub async fn apply_fix(&self, name: &str) -> Result<FixOutcome> {
        let Some(validator) = self.registry.get(name) else {
            bail!("Check '{}' not found", name);
        };
        if !validator.can_fix() {
            let current = self.run_one(validator, self.timeouts.check).await;
            return Ok(FixOutcome::NotFixable(current));
        }

        let limit = self.timeouts.fix;
        let fixed = tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(format!("fix for '{}' cancelled", name)),
            outcome = tokio::time::timeout(limit, validator.fix(&self.ctx)) => match outcome {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err(format!("fix for '{}' timed out after {}s", name, limit.as_secs())),
            },
        };
        if let Err(message) = fixed {
            warn!(check = name, error = %message, "fix failed");
            return Ok(FixOutcome::Failed(message));
        }

        let after = self.run_one(validator, self.timeouts.check).await;
        Ok(if after.is_fail() {
            FixOutcome::StillFailing(after)
        } else {
            FixOutcome::Fixed(after)
        })
    }

    #[cfg(test)]
    /// Validates, then fixes when the check is not passing.
    pub async fn fix_check(&self, name: &str) -> Result<FixOutcome> {
        let before = self.run_check(name).await?;
        if before.status == Status::Pass {
            return Ok(FixOutcome::AlreadyPassing);
        }
        self.apply_fix(name).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AnvilPaths;
    use crate::testing::{FakeHost, FakePackageManager};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub(crate) fn context<'a>(
        store: &'a ConfigStore,
        home: &std::path::Path,
        pm: Arc<FakePackageManager>,
        host: FakeHost,
    ) -> DoctorContext<'a> {
        let oracle = Arc::new(
            AppPresenceOracle::new(pm.clone(), Arc::new(host))
                .with_applications_dir(home.join("Applications")),
        );
        DoctorContext::new(store, home.to_path_buf(), CancellationToken::new())
            .with_package_manager(pm, oracle)
    }

    pub(crate) fn initialized_store(temp: &std::path::Path) -> ConfigStore {
        let store = ConfigStore::new(AnvilPaths::new(temp.join(".anvil")));
        store.paths().create_directories().unwrap();
        let mut settings = Settings::sample();
        settings.git.username = "Alice".to_string();
        settings.git.email = "alice@example.com".to_string();
        settings.github.config_repo = "alice/dotfiles".to_string();
        store.save(&settings).unwrap();
        store
    }

    struct Slow;

    #[async_trait]
    impl Validator for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn category(&self) -> Category {
            Category::Environment
        }
        fn description(&self) -> &'static str {
            "never finishes"
        }
        async fn validate(&self, _ctx: &DoctorContext<'_>) -> CheckResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            self.report(Status::Pass, "done")
        }
    }

    #[test]
    fn test_default_registry() {
        let registry = Registry::with_defaults();
        assert_eq!(registry.len(), 14);

        let names: HashSet<_> = registry.all().iter().map(|v| v.name()).collect();
        assert_eq!(names.len(), 14);
        for name in ["init-run", "homebrew", "git-config", "sync-config", "github-access"] {
            assert!(names.contains(name), "{name} missing");
        }

        let listed: Vec<_> = registry.list().into_iter().map(|(c, _)| c).collect();
        assert_eq!(listed, Category::ALL.to_vec());
        assert_eq!(registry.by_category(Category::Connectivity).len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            CheckResult::new("a", Category::Environment, Status::Pass, ""),
            CheckResult::new("b", Category::Environment, Status::Warn, ""),
            CheckResult::new("c", Category::Environment, Status::Skip, ""),
            CheckResult::new("d", Category::Environment, Status::Pass, ""),
        ];
        let summary = Summary::from_results(&results);
        assert_eq!(
            summary,
            Summary {
                passed: 2,
                warned: 1,
                failed: 0,
                skipped: 1
            }
        );
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn test_unknown_check_and_category() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));

        let err = doctor.run_check("nope").await.unwrap_err();
        assert!(err.to_string().contains("Check 'nope' not found"));
        let err = doctor.run_category("network", None).await.unwrap_err();
        assert!(err.to_string().contains("Category 'network' not found"));
        assert!(doctor.fix_candidates(Some("nope")).is_err());
    }

    #[tokio::test]
    async fn test_missing_settings_reports_config_load() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(AnvilPaths::new(temp.path().join(".anvil")));
        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));

        let results = doctor.run_all(None).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "config-load");
        assert!(results[0].is_fail());
        assert!(results[0].fix_hint.contains("anvil init"));
    }

    #[tokio::test]
    async fn test_category_runs_in_registration_order_with_progress() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));

        let seen = Mutex::new(Vec::new());
        let progress = |r: &CheckResult, done: usize, total: usize| {
            seen.lock().unwrap().push((r.name.clone(), done, total));
        };
        let results = doctor
            .run_category("environment", Some(&progress))
            .await
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["init-run", "settings-file", "directory-structure"]);
        assert!(results.iter().all(|r| r.status == Status::Pass));
        assert_eq!(seen.lock().unwrap().last().unwrap(), &("directory-structure".to_string(), 3, 3));
    }

    #[tokio::test]
    async fn test_slow_check_times_out() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let mut registry = Registry::new();
        registry.register(Box::new(Slow));
        let doctor = Doctor::with_registry(
            context(&store, temp.path(), Arc::new(FakePackageManager::new()), FakeHost::default()),
            registry,
        )
        .with_timeouts(Timeouts {
            check: Duration::from_millis(50),
            category: Duration::from_millis(50),
            all: Duration::from_millis(50),
            fix: Duration::from_millis(50),
        });

        let result = doctor.run_check("slow").await.unwrap();
        assert!(result.is_fail());
        assert!(result.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_required_tools_fix_installs_missing() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let pm = Arc::new(FakePackageManager::new().with_formula("git"));
        let doctor = Doctor::new(context(&store, temp.path(), pm.clone(), FakeHost::default()));

        let before = doctor.run_check("required-tools").await.unwrap();
        assert!(before.is_fail());
        assert!(before.auto_fix);
        assert!(before.message.contains("curl"));

        let outcome = doctor.fix_check("required-tools").await.unwrap();
        assert!(matches!(outcome, FixOutcome::Fixed(ref r) if r.status == Status::Pass));
        assert_eq!(pm.installs(), vec!["install curl"]);
    }

    #[tokio::test]
    async fn test_fix_candidates_only_fixable() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));

        let all: Vec<_> = doctor
            .fix_candidates(None)
            .unwrap()
            .iter()
            .map(|v| v.name())
            .collect();
        assert!(all.contains(&"git-config"));
        assert!(!all.contains(&"sync-config"));

        let deps: Vec<_> = doctor
            .fix_candidates(Some("dependencies"))
            .unwrap()
            .iter()
            .map(|v| v.name())
            .collect();
        assert_eq!(deps, vec!["homebrew", "homebrew-updates", "required-tools"]);

        let outcome = doctor.apply_fix("github-config").await.unwrap();
        assert!(matches!(outcome, FixOutcome::NotFixable(_)));
    }
}
