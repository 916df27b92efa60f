use regex_lite::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::{Settings, ToolConfig, BUILT_IN_GROUPS};

pub const MAX_GROUP_NAME_LEN: usize = 50;
pub const MAX_APP_NAME_LEN: usize = 100;
pub const MAX_USERNAME_LEN: usize = 100;
pub const MAX_SCRIPT_LEN: usize = 500;
pub const MAX_ENV_VALUE_LEN: usize = 1000;

static GROUP_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());
static APP_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").unwrap());
static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]{2,}$").unwrap());
static ENV_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap());
static CANONICAL_REPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$").unwrap());

/// Repository URL shapes, tried in order. The first capture group is `owner/repo`.
static REPO_FORMS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^https?://github\.com/([^/]+/[^/]+?)(?:\.git)?/?$",
        r"^https?://github\.com/([^/]+/[^/]+)/.*$",
        r"^git@github\.com:([^/]+/[^/]+?)(?:\.git)?/?$",
        r"^github\.com/([^/]+/[^/]+?)(?:\.git)?/?$",
        r"^github\.com/([^/]+/[^/]+)/.*$",
        r"^([^/]+/[^/]+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("group name cannot be empty")]
    EmptyGroupName,
    #[error("group name '{0}' is longer than 50 characters")]
    GroupNameTooLong(String),
    #[error("group name '{0}' may only contain letters, numbers, hyphens and underscores")]
    InvalidGroupName(String),
    #[error("app name cannot be empty")]
    EmptyAppName,
    #[error("app name '{0}' is longer than 100 characters")]
    AppNameTooLong(String),
    #[error("app name '{0}' may only contain letters, numbers, dots, hyphens and underscores")]
    InvalidAppName(String),
    #[error("version '{0}' must look like 1.0.0")]
    InvalidVersion(String),
    #[error("tools.required_tools cannot be empty")]
    NoRequiredTools,
    #[error("tool '{name}' appears in both tools.{first} and tools.{second}")]
    DuplicateTool {
        name: String,
        first: &'static str,
        second: &'static str,
    },
    #[error("built-in group '{0}' is missing from groups")]
    MissingBuiltInGroup(String),
    #[error("group '{0}' cannot be empty")]
    EmptyGroup(String),
    #[error("git.username is longer than 100 characters")]
    UsernameTooLong,
    #[error("git.email '{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("github.config_repo '{0}' is not in 'owner/repo' form")]
    InvalidRepo(String),
    #[error("github.branch cannot be empty")]
    EmptyBranch,
    #[error("github.local_path '{0}' must be an absolute path")]
    RelativeLocalPath(String),
    #[error("github.token_env_var '{0}' must match ^[A-Z_][A-Z0-9_]*$")]
    InvalidTokenEnvVar(String),
    #[error("tool_configs.{tool}.post_install_script is longer than 500 characters")]
    ScriptTooLong { tool: String },
    #[error("tool_configs.{tool}.environment_setup key '{key}' must match ^[A-Z_][A-Z0-9_]*$")]
    InvalidEnvKey { tool: String, key: String },
    #[error("tool_configs.{tool}.environment_setup value for '{key}' is longer than 1000 characters")]
    EnvValueTooLong { tool: String, key: String },
    #[error("tool_configs.{tool}.dependencies: {source}")]
    InvalidDependency {
        tool: String,
        #[source]
        source: Box<ValidationError>,
    },
}

pub fn validate_group_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyGroupName);
    }
    if name.len() > MAX_GROUP_NAME_LEN {
        return Err(ValidationError::GroupNameTooLong(name.to_string()));
    }
    if !GROUP_NAME.is_match(name) {
        return Err(ValidationError::InvalidGroupName(name.to_string()));
    }
    Ok(())
}

pub fn validate_app_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyAppName);
    }
    if name.len() > MAX_APP_NAME_LEN {
        return Err(ValidationError::AppNameTooLong(name.to_string()));
    }
    if !APP_NAME.is_match(name) {
        return Err(ValidationError::InvalidAppName(name.to_string()));
    }
    Ok(())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

pub fn is_valid_env_key(key: &str) -> bool {
    ENV_KEY.is_match(key)
}

pub fn is_canonical_repo(repo: &str) -> bool {
    CANONICAL_REPO.is_match(repo)
}

/// Reduces any accepted GitHub reference to `owner/repo`.
///
/// Unrecognised input is returned trimmed but otherwise untouched so that the
/// settings check can report it verbatim.
pub fn normalize_repo(input: &str) -> String {
    let trimmed = input.trim().trim_matches(|c| c == '"' || c == '\'').trim();

    for form in REPO_FORMS.iter() {
        if let Some(caps) = form.captures(trimmed) {
            if let Some(m) = caps.get(1) {
                let repo = m.as_str();
                return repo.strip_suffix(".git").unwrap_or(repo).to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Checks every invariant of a settings document, returning the first violation.
pub fn validate_settings(settings: &Settings) -> Result<(), ValidationError> {
    if !VERSION.is_match(&settings.version) {
        return Err(ValidationError::InvalidVersion(settings.version.clone()));
    }

    validate_tools(settings)?;
    validate_groups(settings)?;
    validate_git(settings)?;
    validate_github(settings)?;

    for (tool, config) in &settings.tool_configs.tools {
        validate_tool_config(tool, config)?;
    }

    Ok(())
}

fn validate_tools(settings: &Settings) -> Result<(), ValidationError> {
    let tools = &settings.tools;
    if tools.required_tools.is_empty() {
        return Err(ValidationError::NoRequiredTools);
    }

    let lists: [(&'static str, &Vec<String>); 3] = [
        ("required_tools", &tools.required_tools),
        ("optional_tools", &tools.optional_tools),
        ("installed_apps", &tools.installed_apps),
    ];

    let mut seen: HashMap<&str, &'static str> = HashMap::new();
    for (list_name, names) in lists {
        for name in names {
            validate_app_name(name)?;
            if let Some(first) = seen.get(name.as_str()) {
                if *first != list_name {
                    return Err(ValidationError::DuplicateTool {
                        name: name.clone(),
                        first: *first,
                        second: list_name,
                    });
                }
            } else {
                seen.insert(name.as_str(), list_name);
            }
        }
    }

    Ok(())
}

fn validate_groups(settings: &Settings) -> Result<(), ValidationError> {
    for built_in in BUILT_IN_GROUPS {
        if !settings.groups.contains_key(built_in) {
            return Err(ValidationError::MissingBuiltInGroup(built_in.to_string()));
        }
    }

    for (name, tools) in &settings.groups {
        validate_group_name(name)?;
        if tools.is_empty() {
            return Err(ValidationError::EmptyGroup(name.clone()));
        }
        for tool in tools {
            validate_app_name(tool)?;
        }
    }

    Ok(())
}

fn validate_git(settings: &Settings) -> Result<(), ValidationError> {
    let git = &settings.git;
    if git.username.chars().count() > MAX_USERNAME_LEN {
        return Err(ValidationError::UsernameTooLong);
    }
    if !git.email.is_empty() && !is_valid_email(&git.email) {
        return Err(ValidationError::InvalidEmail(git.email.clone()));
    }
    Ok(())
}

fn validate_github(settings: &Settings) -> Result<(), ValidationError> {
    let github = &settings.github;

    if !github.config_repo.is_empty() && !is_canonical_repo(&github.config_repo) {
        return Err(ValidationError::InvalidRepo(github.config_repo.clone()));
    }
    if github.branch.trim().is_empty() {
        return Err(ValidationError::EmptyBranch);
    }

    let expanded = shellexpand::tilde(&github.local_path);
    if github.local_path.is_empty() || !Path::new(expanded.as_ref()).is_absolute() {
        return Err(ValidationError::RelativeLocalPath(github.local_path.clone()));
    }

    if !github.token_env_var.is_empty() && !is_valid_env_key(&github.token_env_var) {
        return Err(ValidationError::InvalidTokenEnvVar(github.token_env_var.clone()));
    }

    Ok(())
}

pub fn validate_tool_config(tool: &str, config: &ToolConfig) -> Result<(), ValidationError> {
    if config.post_install_script.chars().count() > MAX_SCRIPT_LEN {
        return Err(ValidationError::ScriptTooLong {
            tool: tool.to_string(),
        });
    }

    for (key, value) in &config.environment_setup {
        if !is_valid_env_key(key) {
            return Err(ValidationError::InvalidEnvKey {
                tool: tool.to_string(),
                key: key.clone(),
            });
        }
        if value.chars().count() > MAX_ENV_VALUE_LEN {
            return Err(ValidationError::EnvValueTooLong {
                tool: tool.to_string(),
                key: key.clone(),
            });
        }
    }

    for dependency in &config.dependencies {
        validate_app_name(dependency).map_err(|e| ValidationError::InvalidDependency {
            tool: tool.to_string(),
            source: Box::new(e),
        })?;
    }

    Ok(())
}
