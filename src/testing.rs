//! In-memory stand-ins for the package manager and host used by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::brew::{BrewError, BrewInstall, PackageKind, PackageManager};
use crate::git::Credentials;
use crate::presence::Host;
use crate::process::ProcessError;
use crate::sync::{RepoVisibility, Visibility};

#[derive(Default)]
pub struct FakePackageManager {
    formulas: Mutex<HashSet<String>>,
    installed_casks: Mutex<HashSet<String>>,
    /// cask name -> `brew info --cask` text
    catalog: HashMap<String, String>,
    transient_failures: Mutex<HashMap<String, usize>>,
    always_fail: HashSet<String>,
    existing_apps: HashSet<String>,
    outdated: Vec<String>,
    unavailable: bool,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formula(self, name: &str) -> Self {
        self.formulas.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn with_installed_cask(self, name: &str) -> Self {
        self.installed_casks.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn with_cask(mut self, name: &str, info: &str) -> Self {
        self.catalog.insert(name.to_string(), info.to_string());
        self
    }

    /// The first `times` installs of `name` fail.
    pub fn failing(self, name: &str, times: usize) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(name.to_string(), times);
        self
    }

    pub fn always_failing(mut self, name: &str) -> Self {
        self.always_fail.insert(name.to_string());
        self
    }

    /// Installs of `name` report "already an App at".
    pub fn with_existing_app(mut self, name: &str) -> Self {
        self.existing_apps.insert(name.to_string());
        self
    }

    pub fn with_outdated(mut self, names: &[&str]) -> Self {
        self.outdated = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn installs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("install"))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String, cancel: &CancellationToken) -> Result<(), ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: "brew".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn version(&self, cancel: &CancellationToken) -> Result<String, BrewError> {
        self.record("version".to_string(), cancel)?;
        if self.unavailable {
            return Err(BrewError::NotInstalled);
        }
        Ok("Homebrew 4.2.0".to_string())
    }

    async fn is_formula_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        self.record(format!("list-formula {}", name), cancel)?;
        Ok(self.formulas.lock().unwrap().contains(name))
    }

    async fn is_cask_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        self.record(format!("list-cask {}", name), cancel)?;
        Ok(self.installed_casks.lock().unwrap().contains(name))
    }

    async fn search_casks(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProcessError> {
        self.record(format!("search-cask {}", query), cancel)?;
        let mut found: Vec<String> = self
            .catalog
            .keys()
            .filter(|c| c.contains(query))
            .cloned()
            .collect();
        found.sort();
        Ok(found)
    }

    async fn cask_info(
        &self,
        cask: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProcessError> {
        self.record(format!("info-cask {}", cask), cancel)?;
        Ok(self.catalog.get(cask).cloned().unwrap_or_default())
    }

    async fn install(
        &self,
        name: &str,
        kind: PackageKind,
        cancel: &CancellationToken,
    ) -> Result<BrewInstall, BrewError> {
        let label = match kind {
            PackageKind::Cask => format!("install --cask {}", name),
            PackageKind::Formula => format!("install {}", name),
        };
        self.record(label, cancel)?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let slept = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !slept {
            return Err(ProcessError::Cancelled {
                program: "brew".to_string(),
            }
            .into());
        }

        if self.existing_apps.contains(name) {
            return Ok(BrewInstall::ExistingApp);
        }
        if self.always_fail.contains(name) {
            return Err(BrewError::Failed {
                command: format!("brew install {}", name),
                output: format!("No available formula with the name \"{}\"", name),
            });
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BrewError::Failed {
                        command: format!("brew install {}", name),
                        output: "Error: Download failed".to_string(),
                    });
                }
            }
        }

        match kind {
            PackageKind::Cask => self.installed_casks.lock().unwrap().insert(name.to_string()),
            PackageKind::Formula => self.formulas.lock().unwrap().insert(name.to_string()),
        };
        Ok(BrewInstall::Installed)
    }

    async fn outdated(&self, cancel: &CancellationToken) -> Result<Vec<String>, BrewError> {
        self.record("outdated".to_string(), cancel)?;
        Ok(self.outdated.clone())
    }

    async fn update(&self, cancel: &CancellationToken) -> Result<(), BrewError> {
        self.record("update".to_string(), cancel)?;
        Ok(())
    }

    async fn install_self(&self, cancel: &CancellationToken) -> Result<(), BrewError> {
        self.record("install-self".to_string(), cancel)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHost {
    dirs: HashSet<PathBuf>,
    spotlight: HashMap<String, String>,
    on_path: HashMap<String, PathBuf>,
}

impl FakeHost {
    pub fn with_dir(mut self, path: &str) -> Self {
        self.dirs.insert(PathBuf::from(path));
        self
    }

    pub fn with_spotlight(mut self, name: &str, path: &str) -> Self {
        self.spotlight.insert(name.to_string(), path.to_string());
        self
    }

    pub fn with_on_path(mut self, name: &str, path: &str) -> Self {
        self.on_path.insert(name.to_string(), PathBuf::from(path));
        self
    }
}

#[async_trait]
impl Host for FakeHost {
    fn dir_exists(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    async fn spotlight_app(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: "mdfind".to_string(),
            });
        }
        Ok(self.spotlight.get(name).cloned())
    }

    fn on_path(&self, name: &str) -> Option<PathBuf> {
        self.on_path.get(name).cloned()
    }
}

/// Reports the same visibility for every repository.
pub struct FixedVisibility(pub Visibility);

#[async_trait]
impl RepoVisibility for FixedVisibility {
    async fn check(&self, _: &str, _: &Credentials, _: &CancellationToken) -> Visibility {
        self.0.clone()
    }
}
