use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};
use tracing::{debug, info, warn};

use crate::error::{AnvilError, Op};
use crate::process::Cmd;
use crate::validation::{
    is_canonical_repo, normalize_repo, validate_app_name, validate_group_name,
};

pub const ANVIL_DIR: &str = ".anvil";
pub const CONFIG_FILE: &str = "settings.yaml";
pub const TEMP_DIR: &str = "temp";
pub const ARCHIVE_DIR: &str = "archive";
pub const DOTFILES_DIR: &str = "dotfiles";
pub const DIR_MODE: u32 = 0o755;
pub const FILE_MODE: u32 = 0o644;

pub const BUILT_IN_GROUPS: [&str; 2] = ["dev", "new-laptop"];

/// Looked up in order under ~/.ssh when populating `git.ssh_key_path`.
pub const SSH_KEY_CANDIDATES: [&str; 5] = [
    "id_ed25519",
    "id_ed25519_personal",
    "id_rsa",
    "id_rsa_personal",
    "id_ecdsa",
];

/// The settings document at ~/.anvil/settings.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
    #[serde(default)]
    pub git: GitSettings,
    #[serde(default)]
    pub github: GitHubSettings,
    #[serde(default, skip_serializing_if = "ToolConfigs::is_empty")]
    pub tool_configs: ToolConfigs,
    /// Keys this version does not know about, kept so a save does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Tools {
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub optional_tools: Vec<String>,
    #[serde(default)]
    pub installed_apps: Vec<String>,
}

impl Tools {
    pub fn contains(&self, name: &str) -> bool {
        self.required_tools.iter().any(|t| t == name)
            || self.optional_tools.iter().any(|t| t == name)
            || self.installed_apps.iter().any(|t| t == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GitSettings {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub ssh_key_path: String,
}

impl GitSettings {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.email.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default)]
    pub config_repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_token_env_var")]
    pub token_env_var: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            config_repo: String::new(),
            branch: default_branch(),
            local_path: default_local_path(),
            token_env_var: default_token_env_var(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_local_path() -> String {
    "~/.anvil/dotfiles".to_string()
}

fn default_token_env_var() -> String {
    "GITHUB_TOKEN".to_string()
}

impl GitHubSettings {
    pub fn expanded_local_path(&self) -> PathBuf {
        expand(&self.local_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolConfigs {
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

impl ToolConfigs {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Per-tool install behaviour under `tool_configs.tools.<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ToolConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub post_install_script: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_setup: BTreeMap<String, String>,
    #[serde(default)]
    pub config_check: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl Settings {
    /// The document written by `anvil init` before the git identity is filled in.
    pub fn sample() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(
            "dev".to_string(),
            strings(&["git", "zsh", "iterm2", "visual-studio-code"]),
        );
        groups.insert(
            "new-laptop".to_string(),
            strings(&["slack", "google-chrome", "1password"]),
        );

        Self {
            version: default_version(),
            tools: Tools {
                required_tools: strings(&["git", "curl"]),
                optional_tools: strings(&["brew", "docker", "kubectl"]),
                installed_apps: Vec::new(),
            },
            groups,
            configs: BTreeMap::new(),
            git: GitSettings::default(),
            github: GitHubSettings::default(),
            tool_configs: ToolConfigs::default(),
            extra: BTreeMap::new(),
        }
    }

    /// True if `name` is listed anywhere: any tools list or any group.
    pub fn mentions_app(&self, name: &str) -> bool {
        self.tools.contains(name) || self.groups.values().any(|g| g.iter().any(|t| t == name))
    }

    pub fn is_built_in_group(name: &str) -> bool {
        BUILT_IN_GROUPS.contains(&name)
    }

    /// Custom group names, sorted.
    pub fn custom_groups(&self) -> Vec<String> {
        self.groups
            .keys()
            .filter(|g| !Self::is_built_in_group(g))
            .cloned()
            .collect()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Locations under the anvil directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnvilPaths {
    root: PathBuf,
}

impl AnvilPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns ~/.anvil
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(Self::new(home.join(ANVIL_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    /// Where `config pull <name>` stages files.
    pub fn staged(&self, name: &str) -> PathBuf {
        self.temp_dir().join(name)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn dotfiles_dir(&self) -> PathBuf {
        self.root.join(DOTFILES_DIR)
    }

    pub fn create_directories(&self) -> Result<()> {
        for dir in [self.root.clone(), self.temp_dir(), self.archive_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))
                .with_context(|| format!("Failed to set permissions: {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Where a resolved app config lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppLocation {
    Configured(PathBuf),
    Staged(PathBuf),
}

impl AppLocation {
    pub fn path(&self) -> &Path {
        match self {
            AppLocation::Configured(p) | AppLocation::Staged(p) => p,
        }
    }
}

/// Reads, caches and writes the settings file.
///
/// The cache is loaded on first read and dropped on every write, so callers
/// always observe the last saved document.
#[derive(Debug)]
pub struct ConfigStore {
    paths: AnvilPaths,
    cache: RwLock<Option<Settings>>,
}

static GLOBAL: OnceLock<ConfigStore> = OnceLock::new();

impl ConfigStore {
    pub fn new(paths: AnvilPaths) -> Self {
        Self {
            paths,
            cache: RwLock::new(None),
        }
    }

    /// The process-wide store rooted at ~/.anvil
    pub fn global() -> Result<&'static ConfigStore> {
        if let Some(store) = GLOBAL.get() {
            return Ok(store);
        }
        let paths = AnvilPaths::from_home()?;
        Ok(GLOBAL.get_or_init(|| ConfigStore::new(paths)))
    }

    pub fn paths(&self) -> &AnvilPaths {
        &self.paths
    }

    pub fn exists(&self) -> bool {
        self.paths.settings_file().exists()
    }

    pub fn load(&self) -> Result<Settings> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| anyhow!("settings cache lock poisoned"))?;
            if let Some(settings) = cache.as_ref() {
                return Ok(settings.clone());
            }
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("settings cache lock poisoned"))?;
        if let Some(settings) = cache.as_ref() {
            return Ok(settings.clone());
        }

        let settings = self.read_from_disk()?;
        *cache = Some(settings.clone());
        Ok(settings)
    }

    fn read_from_disk(&self) -> Result<Settings> {
        let path = self.paths.settings_file();
        if !path.exists() {
            return Err(AnvilError::configuration(
                Op::Config,
                "load-config",
                format!(
                    "settings file not found at {}. Run 'anvil init' to create it",
                    path.display()
                ),
            )
            .into());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let mut settings: Settings = serde_yaml::from_str(&content).map_err(|e| {
            AnvilError::configuration(Op::Config, "parse-config", e)
                .with_context(path.display().to_string())
        })?;

        let normalized = normalize_repo(&settings.github.config_repo);
        if normalized != settings.github.config_repo {
            info!(
                from = %settings.github.config_repo,
                to = %normalized,
                "normalized github.config_repo"
            );
            settings.github.config_repo = normalized;
            if let Err(e) = write_settings(&path, &settings) {
                warn!("could not save corrected github.config_repo: {:#}", e);
            }
        }

        let repo = &settings.github.config_repo;
        if !repo.is_empty() && !is_canonical_repo(repo) {
            warn!(repo = %repo, "github.config_repo is not in owner/repo form");
        }

        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Writes through and invalidates the cache.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("settings cache lock poisoned"))?;
        *cache = None;
        write_settings(&self.paths.settings_file(), settings)
    }

    /// Drops the cached document after the file was replaced behind the store's back.
    pub fn invalidate(&self) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|_| anyhow!("settings cache lock poisoned"))?;
        *cache = None;
        Ok(())
    }

    /// Loads, applies `change`, and saves only when it reports a modification.
    pub fn update<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Settings) -> Result<bool>,
    {
        let mut settings = self.load()?;
        let changed = change(&mut settings)?;
        if changed {
            self.save(&settings)?;
        }
        Ok(changed)
    }

    /// Writes the sample settings if none exist. Returns false when a file was already present.
    pub async fn generate_default(&self, home: &Path) -> Result<bool> {
        if self.exists() {
            return Ok(false);
        }

        let mut settings = Settings::sample();
        settings.github.local_path = self.paths.dotfiles_dir().display().to_string();
        populate_git_from_system(&mut settings.git, home).await?;
        self.save(&settings)?;
        Ok(true)
    }

    pub fn group_tools(&self, group: &str) -> Result<Vec<String>> {
        let settings = self.load()?;
        match settings.groups.get(group) {
            Some(tools) => Ok(tools.clone()),
            None => bail!("group '{}' not found", group),
        }
    }

    pub fn has_group(&self, group: &str) -> Result<bool> {
        Ok(self.load()?.groups.contains_key(group))
    }

    /// Records an individually installed app. No-op when the app is already listed anywhere.
    pub fn add_installed_app(&self, app: &str) -> Result<bool> {
        validate_app_name(app).map_err(|e| AnvilError::validation(Op::Install, app, e))?;
        self.update(|settings| {
            if settings.mentions_app(app) {
                return Ok(false);
            }
            settings.tools.installed_apps.push(app.to_string());
            Ok(true)
        })
    }

    pub fn is_app_tracked(&self, app: &str) -> Result<bool> {
        Ok(self.load()?.mentions_app(app))
    }

    pub fn installed_apps(&self) -> Result<Vec<String>> {
        Ok(self.load()?.tools.installed_apps)
    }

    pub fn remove_installed_app(&self, app: &str) -> Result<bool> {
        self.update(|settings| {
            let before = settings.tools.installed_apps.len();
            settings.tools.installed_apps.retain(|a| a != app);
            Ok(settings.tools.installed_apps.len() != before)
        })
    }

    /// Appends `app` to `group`, creating the group when missing.
    pub fn add_app_to_group(&self, group: &str, app: &str) -> Result<bool> {
        validate_group_name(group).map_err(|e| AnvilError::validation(Op::Install, group, e))?;
        validate_app_name(app).map_err(|e| AnvilError::validation(Op::Install, app, e))?;
        self.update(|settings| {
            let tools = settings.groups.entry(group.to_string()).or_default();
            if tools.iter().any(|t| t == app) {
                return Ok(false);
            }
            tools.push(app.to_string());
            Ok(true)
        })
    }

    pub fn update_group_tools(&self, group: &str, tools: Vec<String>) -> Result<()> {
        validate_group_name(group).map_err(|e| AnvilError::validation(Op::Install, group, e))?;
        self.update(|settings| {
            settings.groups.insert(group.to_string(), tools);
            Ok(true)
        })?;
        Ok(())
    }

    pub fn add_groups(&self, groups: BTreeMap<String, Vec<String>>) -> Result<()> {
        self.update(|settings| {
            settings.groups.extend(groups);
            Ok(true)
        })?;
        Ok(())
    }

    pub fn app_config_path(&self, app: &str) -> Result<Option<PathBuf>> {
        Ok(self.load()?.configs.get(app).map(|p| expand(p)))
    }

    #[cfg(test)]
    pub fn set_app_config_path(&self, app: &str, path: &str) -> Result<()> {
        validate_app_name(app).map_err(|e| AnvilError::validation(Op::Config, app, e))?;
        self.update(|settings| {
            settings.configs.insert(app.to_string(), path.to_string());
            Ok(true)
        })?;
        Ok(())
    }

    pub fn configured_apps(&self) -> Result<Vec<String>> {
        Ok(self.load()?.configs.keys().cloned().collect())
    }

    /// `configs.<app>` when set, otherwise the pulled copy under temp/ if present.
    pub fn resolve_app_location(&self, app: &str) -> Result<Option<AppLocation>> {
        if let Some(path) = self.app_config_path(app)? {
            return Ok(Some(AppLocation::Configured(path)));
        }
        let staged = self.paths.staged(app);
        if staged.exists() {
            return Ok(Some(AppLocation::Staged(staged)));
        }
        Ok(None)
    }
}

fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = serde_yaml::to_string(settings).context("Failed to serialize settings")?;

    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, content)
        .with_context(|| format!("Failed to write settings file: {}", tmp.display()))?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(FILE_MODE))
        .with_context(|| format!("Failed to set permissions: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

    debug!(path = %path.display(), "saved settings");
    Ok(())
}

/// `git config --global <key>` as seen from `home`, when set and non-empty.
pub async fn global_git_value(key: &str, home: &Path) -> Option<String> {
    let out = Cmd::new("git")
        .args(["config", "--global", key])
        .env("HOME", home.display().to_string())
        .run()
        .await
        .ok()?;
    let value = out.stdout_trimmed();
    (out.success && !value.is_empty()).then(|| value.to_string())
}

/// Fills the git identity from the user's global git config and picks the first
/// SSH key that exists. Existing values are only replaced by non-empty ones.
pub async fn populate_git_from_system(git: &mut GitSettings, home: &Path) -> Result<()> {
    if let Some(name) = global_git_value("user.name", home).await {
        git.username = name;
    }
    if let Some(email) = global_git_value("user.email", home).await {
        git.email = email;
    }

    let ssh_dir = home.join(".ssh");
    let key = SSH_KEY_CANDIDATES
        .iter()
        .map(|k| ssh_dir.join(k))
        .find(|p| p.exists())
        .unwrap_or_else(|| ssh_dir.join(SSH_KEY_CANDIDATES[0]));
    git.ssh_key_path = key.display().to_string();

    Ok(())
}

/// Advisory notes about the local environment shown after `anvil init`.
pub async fn environment_warnings(home: &Path) -> Vec<String> {
    let mut warnings = Vec::new();

    if global_git_value("user.name", home).await.is_none() {
        warnings.push("Configure git user.name: git config --global user.name 'Your Name'".to_string());
    }
    if global_git_value("user.email", home).await.is_none() {
        warnings.push(
            "Configure git user.email: git config --global user.email 'your.email@example.com'"
                .to_string(),
        );
    }

    let ssh_dir = home.join(".ssh");
    if !ssh_dir.exists() {
        warnings.push(
            "Set up SSH keys for GitHub: ssh-keygen -t ed25519 -C 'your.email@example.com'"
                .to_string(),
        );
    } else if !["id_rsa", "id_ed25519", "id_ecdsa"]
        .iter()
        .any(|k| ssh_dir.join(k).exists())
    {
        warnings.push(
            "No SSH keys found in ~/.ssh - consider generating SSH keys for GitHub".to_string(),
        );
    }

    for var in ["EDITOR", "SHELL"] {
        if std::env::var(var).map(|v| v.is_empty()).unwrap_or(true) {
            warnings.push(format!("Consider setting {} environment variable", var));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with(settings: &Settings) -> (TempDir, ConfigStore) {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(AnvilPaths::new(temp.path().join(".anvil")));
        store.save(settings).unwrap();
        (temp, store)
    }

    #[test]
    fn test_parse_settings() {
        let yaml = r#"
version: 1.2.0
tools:
  required_tools: [git, curl]
  optional_tools: [docker]
groups:
  dev: [git, zsh]
  new-laptop: [slack]
configs:
  cursor: ~/Library/Application Support/Cursor/User
git:
  username: Alice
  email: alice@example.com
github:
  config_repo: alice/dotfiles
  branch: develop
tool_configs:
  tools:
    zsh:
      post_install_script: echo done
      environment_setup:
        ZSH_THEME: agnoster
"#;

        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.version, "1.2.0");
        assert_eq!(settings.tools.required_tools, vec!["git", "curl"]);
        assert_eq!(settings.groups["dev"], vec!["git", "zsh"]);
        assert_eq!(settings.git.username, "Alice");
        assert_eq!(settings.github.branch, "develop");
        assert_eq!(settings.github.token_env_var, "GITHUB_TOKEN");
        assert_eq!(settings.github.local_path, "~/.anvil/dotfiles");
        assert_eq!(
            settings.tool_configs.tools["zsh"].environment_setup["ZSH_THEME"],
            "agnoster"
        );
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let yaml = r#"
version: 1.0.0
_sync_config:
  exclude: [git]
custom_section:
  answer: 42
"#;
        let temp = TempDir::new().unwrap();
        let paths = AnvilPaths::new(temp.path());
        fs::write(paths.settings_file(), yaml).unwrap();

        let store = ConfigStore::new(paths.clone());
        let settings = store.load().unwrap();
        assert!(settings.extra.contains_key("_sync_config"));
        store.save(&settings).unwrap();

        let written = fs::read_to_string(paths.settings_file()).unwrap();
        assert!(written.contains("_sync_config"));
        assert!(written.contains("answer: 42"));
    }

    #[test]
    fn test_load_missing_file_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(AnvilPaths::new(temp.path()));
        let err = store.load().unwrap_err();
        let anvil = err.downcast_ref::<AnvilError>().unwrap();
        assert_eq!(anvil.kind, crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("anvil init"));
    }

    #[test]
    fn test_load_normalizes_and_writes_back_repo() {
        let mut settings = Settings::sample();
        settings.github.config_repo = "https://github.com/alice/dotfiles.git".to_string();
        let (_temp, store) = store_with(&settings);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.github.config_repo, "alice/dotfiles");

        let on_disk = fs::read_to_string(store.paths().settings_file()).unwrap();
        assert!(on_disk.contains("config_repo: alice/dotfiles"));
    }

    #[test]
    fn test_cache_invalidated_on_save() {
        let (_temp, store) = store_with(&Settings::sample());
        let mut settings = store.load().unwrap();
        assert!(settings.git.username.is_empty());

        settings.git.username = "Alice".to_string();
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap().git.username, "Alice");
    }

    #[test]
    fn test_add_installed_app_is_idempotent() {
        let (_temp, store) = store_with(&Settings::sample());

        assert!(store.add_installed_app("firefox").unwrap());
        assert!(!store.add_installed_app("firefox").unwrap());
        assert_eq!(store.installed_apps().unwrap(), vec!["firefox"]);
    }

    #[test]
    fn test_add_installed_app_skips_listed_apps() {
        let (_temp, store) = store_with(&Settings::sample());

        // required tool
        assert!(!store.add_installed_app("git").unwrap());
        // group member
        assert!(!store.add_installed_app("slack").unwrap());
        assert!(store.installed_apps().unwrap().is_empty());
        assert!(store.is_app_tracked("slack").unwrap());
        assert!(!store.is_app_tracked("firefox").unwrap());
    }

    #[test]
    fn test_add_installed_app_rejects_bad_names() {
        let (_temp, store) = store_with(&Settings::sample());
        assert!(store.add_installed_app("bad name").is_err());
    }

    #[test]
    fn test_remove_installed_app() {
        let (_temp, store) = store_with(&Settings::sample());
        store.add_installed_app("firefox").unwrap();
        assert!(store.remove_installed_app("firefox").unwrap());
        assert!(!store.remove_installed_app("firefox").unwrap());
    }

    #[test]
    fn test_add_app_to_group_creates_group() {
        let (_temp, store) = store_with(&Settings::sample());

        assert!(store.add_app_to_group("design", "figma").unwrap());
        assert!(!store.add_app_to_group("design", "figma").unwrap());
        assert_eq!(store.group_tools("design").unwrap(), vec!["figma"]);
        assert!(store.add_app_to_group("bad group", "figma").is_err());
    }

    #[test]
    fn test_group_tools_unknown_group() {
        let (_temp, store) = store_with(&Settings::sample());
        assert!(store.group_tools("nope").is_err());
        assert!(store.has_group("dev").unwrap());
    }

    #[test]
    fn test_resolve_app_location() {
        let (_temp, store) = store_with(&Settings::sample());
        assert_eq!(store.resolve_app_location("cursor").unwrap(), None);

        let staged = store.paths().staged("cursor");
        fs::create_dir_all(&staged).unwrap();
        assert_eq!(
            store.resolve_app_location("cursor").unwrap(),
            Some(AppLocation::Staged(staged))
        );

        store.set_app_config_path("cursor", "/tmp/cursor").unwrap();
        assert_eq!(
            store.resolve_app_location("cursor").unwrap(),
            Some(AppLocation::Configured(PathBuf::from("/tmp/cursor")))
        );
        assert_eq!(store.configured_apps().unwrap(), vec!["cursor"]);
    }

    #[test]
    fn test_settings_file_mode() {
        let (_temp, store) = store_with(&Settings::sample());
        let mode = fs::metadata(store.paths().settings_file())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }

    #[test]
    fn test_custom_groups_sorted() {
        let mut settings = Settings::sample();
        settings.groups.insert("zeta".to_string(), vec!["a".to_string()]);
        settings.groups.insert("alpha".to_string(), vec!["b".to_string()]);
        assert_eq!(settings.custom_groups(), vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_populate_git_from_system_reads_global_config() {
        let home = TempDir::new().unwrap();
        fs::write(
            home.path().join(".gitconfig"),
            "[user]\n\tname = Alice\n\temail = alice@example.com\n",
        )
        .unwrap();
        fs::create_dir_all(home.path().join(".ssh")).unwrap();
        fs::write(home.path().join(".ssh/id_rsa"), "key").unwrap();

        let mut git = GitSettings::default();
        populate_git_from_system(&mut git, home.path()).await.unwrap();

        assert_eq!(git.username, "Alice");
        assert_eq!(git.email, "alice@example.com");
        assert_eq!(
            git.ssh_key_path,
            home.path().join(".ssh/id_rsa").display().to_string()
        );
    }

    #[tokio::test]
    async fn test_generate_default_never_overwrites() {
        let home = TempDir::new().unwrap();
        let store = ConfigStore::new(AnvilPaths::new(home.path().join(".anvil")));

        assert!(store.generate_default(home.path()).await.unwrap());
        let settings = store.load().unwrap();
        assert_eq!(settings.groups["dev"].len(), 4);
        assert_eq!(
            settings.git.ssh_key_path,
            home.path().join(".ssh/id_ed25519").display().to_string()
        );

        store.add_installed_app("firefox").unwrap();
        assert!(!store.generate_default(home.path()).await.unwrap());
        assert_eq!(store.installed_apps().unwrap(), vec!["firefox"]);
    }
}
