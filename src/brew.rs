use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::process::{command_exists, Cmd, Output, ProcessError};

/// Locations checked when `brew` is not yet on PATH (fresh install).
const BREW_PATHS: [&str; 2] = ["/opt/homebrew/bin/brew", "/usr/local/bin/brew"];

const DEFAULT_PROGRAM: &str = "brew";

/// `brew` on PATH, else the first standard install location present.
fn resolve_brew() -> Option<PathBuf> {
    which::which(DEFAULT_PROGRAM)
        .ok()
        .or_else(|| first_existing(&BREW_PATHS))
}

fn first_existing<P: AsRef<Path>>(candidates: &[P]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.is_file())
        .map(Path::to_path_buf)
}

const BREW_INSTALL_SCRIPT: &str = r#"/bin/bash -c "$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)""#;

const ALREADY_AN_APP: &str = "already an App at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Formula,
    Cask,
}

/// What a successful `brew install` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrewInstall {
    Installed,
    /// The cask refused because the bundle is already in /Applications.
    ExistingApp,
}

#[derive(Debug, Error)]
pub enum BrewError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("brew: {output}")]
    Failed { command: String, output: String },
    #[error("Homebrew is not installed")]
    NotInstalled,
    #[error("{0}")]
    Setup(String),
}

impl BrewError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrewError::Process(e) if e.is_cancelled())
    }
}

/// The package manager operations the installer and doctor depend on.
#[async_trait]
pub trait PackageManager: Send + Sync {
    fn is_available(&self) -> bool;

    async fn version(&self, cancel: &CancellationToken) -> Result<String, BrewError>;

    async fn is_formula_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError>;

    async fn is_cask_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError>;

    /// Cask names matching `query`, headers removed.
    async fn search_casks(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProcessError>;

    async fn cask_info(&self, cask: &str, cancel: &CancellationToken)
        -> Result<String, ProcessError>;

    /// A cask if the cask namespace has an exact match, a formula otherwise.
    async fn classify(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<PackageKind, ProcessError> {
        let casks = self.search_casks(name, cancel).await?;
        if casks.iter().any(|c| c == name) {
            Ok(PackageKind::Cask)
        } else {
            Ok(PackageKind::Formula)
        }
    }

    async fn install(
        &self,
        name: &str,
        kind: PackageKind,
        cancel: &CancellationToken,
    ) -> Result<BrewInstall, BrewError>;

    async fn outdated(&self, cancel: &CancellationToken) -> Result<Vec<String>, BrewError>;

    async fn update(&self, cancel: &CancellationToken) -> Result<(), BrewError>;

    async fn install_self(&self, cancel: &CancellationToken) -> Result<(), BrewError>;
}

/// `brew` driven as a child process.
#[derive(Debug, Clone)]
pub struct Homebrew {
    program: String,
    base_args: Vec<String>,
    install_timeout: Duration,
}

impl Default for Homebrew {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            base_args: Vec::new(),
            install_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl Homebrew {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    /// Runs `program base_args... <brew args>` instead of `brew`.
    pub fn with_command<I, S>(program: impl Into<String>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// The configured program, with the default `brew` resolved to a full path
    /// so that a Homebrew that is installed but not yet on PATH still runs.
    fn program(&self) -> String {
        if self.program != DEFAULT_PROGRAM {
            return self.program.clone();
        }
        resolve_brew()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.program.clone())
    }

    fn cmd<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new(self.program())
            .args(self.base_args.iter().cloned())
            .args(args)
    }
}

fn failure(cmd: &Cmd, out: &Output) -> BrewError {
    let message = out.best_message();
    let output = if message.is_empty() {
        format!("installation failed: exit status {}", out.code.unwrap_or(-1))
    } else {
        message.to_string()
    };
    BrewError::Failed {
        command: cmd.display(),
        output,
    }
}

fn parse_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| {
            !l.is_empty() && !l.contains("==>") && !l.contains("Error:") && !l.contains("Warning:")
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl PackageManager for Homebrew {
    fn is_available(&self) -> bool {
        if self.program != DEFAULT_PROGRAM {
            return command_exists(&self.program) || Path::new(&self.program).exists();
        }
        resolve_brew().is_some()
    }

    async fn version(&self, cancel: &CancellationToken) -> Result<String, BrewError> {
        let cmd = self.cmd(["--version"]);
        let out = cmd.output(cancel).await?;
        if !out.success {
            return Err(failure(&cmd, &out));
        }
        Ok(out
            .stdout_trimmed()
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    async fn is_formula_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        let out = self.cmd(["list", "--formula", name]).output(cancel).await?;
        Ok(out.success)
    }

    async fn is_cask_installed(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        let out = self.cmd(["list", "--cask"]).output(cancel).await?;
        if !out.success {
            return Ok(false);
        }
        Ok(out.stdout.split_whitespace().any(|c| c == name))
    }

    async fn search_casks(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProcessError> {
        let out = self.cmd(["search", "--cask", query]).output(cancel).await?;
        if !out.success {
            return Ok(Vec::new());
        }
        Ok(parse_list(&out.stdout))
    }

    async fn cask_info(
        &self,
        cask: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ProcessError> {
        let out = self.cmd(["info", "--cask", cask]).output(cancel).await?;
        Ok(out.stdout)
    }

    async fn install(
        &self,
        name: &str,
        kind: PackageKind,
        cancel: &CancellationToken,
    ) -> Result<BrewInstall, BrewError> {
        let args: Vec<&str> = match kind {
            PackageKind::Cask => vec!["install", "--cask", name],
            PackageKind::Formula => vec!["install", name],
        };
        let cmd = self.cmd(args).timeout(self.install_timeout);
        let out = cmd.output(cancel).await?;

        if out.success {
            info!(package = name, ?kind, "installed");
            return Ok(BrewInstall::Installed);
        }
        if out.stderr.contains(ALREADY_AN_APP) || out.stdout.contains(ALREADY_AN_APP) {
            debug!(package = name, "app bundle already present");
            return Ok(BrewInstall::ExistingApp);
        }
        Err(failure(&cmd, &out))
    }

    async fn outdated(&self, cancel: &CancellationToken) -> Result<Vec<String>, BrewError> {
        let cmd = self.cmd(["outdated", "--quiet"]);
        let out = cmd.output(cancel).await?;
        if !out.success {
            return Err(failure(&cmd, &out));
        }
        Ok(parse_list(&out.stdout))
    }

    async fn update(&self, cancel: &CancellationToken) -> Result<(), BrewError> {
        if !self.is_available() {
            return Err(BrewError::NotInstalled);
        }
        let cmd = self.cmd(["update"]).timeout(Duration::from_secs(10 * 60));
        let out = cmd.output(cancel).await?;
        if !out.success {
            return Err(failure(&cmd, &out));
        }
        Ok(())
    }

    async fn install_self(&self, cancel: &CancellationToken) -> Result<(), BrewError> {
        if !cfg!(target_os = "macos") {
            return Err(BrewError::Setup(
                "Homebrew is only supported on macOS".to_string(),
            ));
        }
        if self.is_available() {
            return Ok(());
        }

        let xcode = Cmd::new("xcode-select").arg("-p").output(cancel).await?;
        if !xcode.success {
            return Err(BrewError::Setup(
                "Xcode Command Line Tools required for Homebrew installation. Install with: xcode-select --install"
                    .to_string(),
            ));
        }

        info!("installing Homebrew");
        let cmd = Cmd::new("/bin/bash")
            .args(["-c", BREW_INSTALL_SCRIPT])
            .env("NONINTERACTIVE", "1")
            .timeout(Duration::from_secs(30 * 60));
        let out = cmd.output(cancel).await?;
        if !out.success {
            return Err(BrewError::Setup(format!(
                "brew installation failed: {}",
                out.best_message()
            )));
        }

        if !self.is_available() {
            return Err(BrewError::Setup(
                "Homebrew installation completed but brew command not accessible".to_string(),
            ));
        }
        Ok(())
    }
}
