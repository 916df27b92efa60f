use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::brew::PackageManager;
use crate::process::{command_exists, Cmd, ProcessError};

pub const APPLICATIONS_DIR: &str = "/Applications";

/// Why the oracle considers an application present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    Formula,
    Cask,
    /// The bundle a matching cask would install already exists.
    CaskBundle(PathBuf),
    Bundle(PathBuf),
    Spotlight(String),
    OnPath(PathBuf),
}

impl fmt::Display for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::Formula => write!(f, "installed via Homebrew formula"),
            Evidence::Cask => write!(f, "installed via Homebrew cask"),
            Evidence::CaskBundle(path) => write!(f, "cask bundle at {}", path.display()),
            Evidence::Bundle(path) => write!(f, "found at {}", path.display()),
            Evidence::Spotlight(path) => write!(f, "found by Spotlight at {}", path),
            Evidence::OnPath(path) => write!(f, "on PATH at {}", path.display()),
        }
    }
}

/// Host facts the oracle reads besides the package manager.
#[async_trait]
pub trait Host: Send + Sync {
    fn dir_exists(&self, path: &Path) -> bool;

    /// First application bundle whose file name contains `name`.
    async fn spotlight_app(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProcessError>;

    fn on_path(&self, name: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

#[async_trait]
impl Host for SystemHost {
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    async fn spotlight_app(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProcessError> {
        if !command_exists("mdfind") {
            return Ok(None);
        }
        let query = format!(
            "kMDItemKind == 'Application' && kMDItemFSName == '*{}*'",
            name
        );
        let out = Cmd::new("mdfind").arg(query).output(cancel).await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    fn on_path(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Formula,
    Cask,
    CaskResolution,
    ApplicationsDir,
    Spotlight,
    Path,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Formula => "formula",
            Channel::Cask => "cask",
            Channel::CaskResolution => "cask-resolution",
            Channel::ApplicationsDir => "applications-dir",
            Channel::Spotlight => "spotlight",
            Channel::Path => "path",
        }
    }
}

type ProbeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Evidence>, ProcessError>> + Send + 'a>>;

type Probe =
    for<'a> fn(&'a AppPresenceOracle, &'a str, &'a CancellationToken) -> ProbeFuture<'a>;

/// Evaluated in order; the first positive answer wins.
const PROBES: &[(Channel, Probe)] = &[
    (Channel::Formula, probe_formula),
    (Channel::Cask, probe_cask),
    (Channel::CaskResolution, probe_cask_resolution),
    (Channel::ApplicationsDir, probe_applications_dir),
    (Channel::Spotlight, probe_spotlight),
    (Channel::Path, probe_path),
];

/// Decides whether an application is already usable on the host.
///
/// Read-only. A probe that errors counts as "absent" for that channel, except
/// for cancellation which stops the whole lookup.
pub struct AppPresenceOracle {
    pm: Arc<dyn PackageManager>,
    host: Arc<dyn Host>,
    applications_dir: PathBuf,
}

impl AppPresenceOracle {
    pub fn new(pm: Arc<dyn PackageManager>, host: Arc<dyn Host>) -> Self {
        Self {
            pm,
            host,
            applications_dir: PathBuf::from(APPLICATIONS_DIR),
        }
    }

    #[cfg(test)]
    pub fn with_applications_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.applications_dir = dir.into();
        self
    }

    pub async fn find(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Evidence>, ProcessError> {
        for (channel, probe) in PROBES {
            match probe(self, name, cancel).await {
                Ok(Some(evidence)) => {
                    debug!(app = name, channel = channel.as_str(), %evidence, "present");
                    return Ok(Some(evidence));
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!(app = name, channel = channel.as_str(), error = %e, "probe failed");
                }
            }
        }
        debug!(app = name, "absent on every channel");
        Ok(None)
    }

    pub async fn is_present(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, ProcessError> {
        Ok(self.find(name, cancel).await?.is_some())
    }
}

fn probe_formula<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move {
        let found = oracle.pm.is_formula_installed(name, cancel).await?;
        Ok(found.then_some(Evidence::Formula))
    })
}

fn probe_cask<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move {
        let found = oracle.pm.is_cask_installed(name, cancel).await?;
        Ok(found.then_some(Evidence::Cask))
    })
}

fn probe_cask_resolution<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move {
        let casks = oracle.pm.search_casks(name, cancel).await?;
        for cask in casks.iter().filter(|c| c.contains(name)) {
            let info = oracle.pm.cask_info(cask, cancel).await?;
            if let Some(path) = extract_app_path(&info) {
                let path = PathBuf::from(path);
                if oracle.host.dir_exists(&path) {
                    return Ok(Some(Evidence::CaskBundle(path)));
                }
            }
        }
        Ok(None)
    })
}

fn probe_applications_dir<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    _cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move {
        Ok(generate_app_names(name)
            .into_iter()
            .map(|candidate| oracle.applications_dir.join(candidate))
            .find(|path| oracle.host.dir_exists(path))
            .map(Evidence::Bundle))
    })
}

fn probe_spotlight<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move {
        Ok(oracle
            .host
            .spotlight_app(name, cancel)
            .await?
            .map(Evidence::Spotlight))
    })
}

fn probe_path<'a>(
    oracle: &'a AppPresenceOracle,
    name: &'a str,
    _cancel: &'a CancellationToken,
) -> ProbeFuture<'a> {
    Box::pin(async move { Ok(oracle.host.on_path(name).map(Evidence::OnPath)) })
}

const KNOWN_BUNDLES: &[(&str, &[&str])] = &[
    ("visual-studio-code", &["Visual Studio Code.app"]),
    ("google-chrome", &["Google Chrome.app"]),
    (
        "1password",
        &["1Password 7 - Password Manager.app", "1Password.app"],
    ),
    ("iterm2", &["iTerm.app"]),
];

/// Upper-cases the first letter of every word. Anything other than a letter,
/// digit or underscore separates words.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_boundary = true;
    for c in s.chars() {
        if at_boundary {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_boundary = !(c.is_alphanumeric() || c == '_');
    }
    out
}

/// Candidate bundle names under /Applications for a package name.
pub fn generate_app_names(name: &str) -> Vec<String> {
    let mut names = vec![format!("{}.app", name), format!("{}.app", title_case(name))];

    if name.contains('-') {
        names.push(format!("{}.app", title_case(&name.replace('-', " "))));
        names.push(format!("{}.app", title_case(&name.replace('-', ""))));
    }

    if let Some((_, bundles)) = KNOWN_BUNDLES.iter().find(|(pkg, _)| *pkg == name) {
        names.extend(bundles.iter().map(|b| b.to_string()));
    }

    let mut seen = std::collections::HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Pulls `/Applications/<X>.app` out of `brew info --cask` output.
pub fn extract_app_path(info: &str) -> Option<&str> {
    info.lines().find_map(|line| {
        let start = line.find("/Applications/")?;
        let end = line[start..].find(".app")?;
        Some(&line[start..start + end + 4])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, FakePackageManager};

    fn oracle(pm: FakePackageManager, host: FakeHost) -> (Arc<FakePackageManager>, AppPresenceOracle) {
        let pm = Arc::new(pm);
        let oracle = AppPresenceOracle::new(pm.clone(), Arc::new(host));
        (pm, oracle)
    }

    #[test]
    fn test_generate_app_names_hyphenated() {
        let names = generate_app_names("visual-studio-code");
        assert_eq!(
            names,
            vec![
                "visual-studio-code.app",
                "Visual-Studio-Code.app",
                "Visual Studio Code.app",
                "Visualstudiocode.app",
            ]
        );
    }

    #[test]
    fn test_generate_app_names_known_mappings() {
        let names = generate_app_names("1password");
        assert!(names.contains(&"1Password.app".to_string()));
        assert!(names.contains(&"1Password 7 - Password Manager.app".to_string()));
        // digits do not start a word, so title casing changes nothing
        assert_eq!(names[0], "1password.app");
        assert_eq!(names.iter().filter(|n| *n == "1password.app").count(), 1);

        assert!(generate_app_names("iterm2").contains(&"iTerm.app".to_string()));
        assert_eq!(generate_app_names("firefox")[1], "Firefox.app");
    }

    #[test]
    fn test_extract_app_path() {
        let info = "==> firefox\nhttps://www.mozilla.org\n==> Artifacts\nFirefox.app (App) -> /Applications/Firefox.app\n";
        assert_eq!(extract_app_path(info), Some("/Applications/Firefox.app"));
        assert_eq!(extract_app_path("no bundle here"), None);
    }

    #[tokio::test]
    async fn test_formula_short_circuits() {
        let (pm, oracle) = oracle(FakePackageManager::new().with_formula("git"), FakeHost::default());
        let evidence = oracle.find("git", &CancellationToken::new()).await.unwrap();
        assert_eq!(evidence, Some(Evidence::Formula));
        assert_eq!(pm.calls(), vec!["list-formula git"]);
    }

    #[tokio::test]
    async fn test_cask_installed() {
        let (_pm, oracle) = oracle(FakePackageManager::new().with_installed_cask("slack"), FakeHost::default());
        let evidence = oracle.find("slack", &CancellationToken::new()).await.unwrap();
        assert_eq!(evidence, Some(Evidence::Cask));
    }

    #[tokio::test]
    async fn test_cask_resolution_finds_bundle() {
        let pm = FakePackageManager::new().with_cask(
            "firefox",
            "==> Artifacts\nFirefox.app (App) /Applications/Firefox.app",
        );
        let host = FakeHost::default().with_dir("/Applications/Firefox.app");
        let (_pm, oracle) = oracle(pm, host);

        let evidence = oracle.find("firefox", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            evidence,
            Some(Evidence::CaskBundle(PathBuf::from("/Applications/Firefox.app")))
        );
    }

    #[tokio::test]
    async fn test_manual_install_in_applications_dir() {
        let host = FakeHost::default().with_dir("/Applications/Visual Studio Code.app");
        let (_pm, oracle) = oracle(FakePackageManager::new(), host);

        let evidence = oracle
            .find("visual-studio-code", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            evidence,
            Some(Evidence::Bundle(PathBuf::from(
                "/Applications/Visual Studio Code.app"
            )))
        );
    }

    #[tokio::test]
    async fn test_spotlight_and_path_channels() {
        let host = FakeHost::default()
            .with_spotlight("figma", "/Users/me/Apps/Figma.app")
            .with_on_path("rg", "/opt/homebrew/bin/rg");
        let (_pm, oracle) = oracle(FakePackageManager::new(), host);
        let token = CancellationToken::new();

        assert_eq!(
            oracle.find("figma", &token).await.unwrap(),
            Some(Evidence::Spotlight("/Users/me/Apps/Figma.app".to_string()))
        );
        assert_eq!(
            oracle.find("rg", &token).await.unwrap(),
            Some(Evidence::OnPath(PathBuf::from("/opt/homebrew/bin/rg")))
        );
    }

    #[tokio::test]
    async fn test_absent_everywhere() {
        let (_pm, oracle) = oracle(FakePackageManager::new(), FakeHost::default());
        assert!(!oracle.is_present("nothing", &CancellationToken::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_lookup_errors() {
        let (_pm, oracle) = oracle(FakePackageManager::new(), FakeHost::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = oracle.find("git", &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
