use anyhow::{Context, Result};
use colored::Colorize;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{expand, ConfigStore, Settings};
use crate::error::{AnvilError, Op};
use crate::process::{command_exists, Cmd};
use crate::ui;
use crate::validation::{validate_app_name, validate_group_name};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    Local(PathBuf),
    Url(String),
}

impl ImportSource {
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            ImportSource::Url(source.to_string())
        } else {
            ImportSource::Local(expand(source))
        }
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<String, AnvilError> {
        match self {
            ImportSource::Local(path) => fs::read_to_string(path).map_err(|e| {
                AnvilError::filesystem(Op::Import, "read-file", e)
                    .with_context(path.display().to_string())
            }),
            ImportSource::Url(url) => {
                if !command_exists("curl") {
                    return Err(AnvilError::platform(
                        Op::Import,
                        "fetch",
                        "curl is required to import from a URL",
                    ));
                }
                let out = Cmd::new("curl")
                    .args(["-fsSL", url.as_str()])
                    .timeout(FETCH_TIMEOUT)
                    .output(cancel)
                    .await
                    .map_err(|e| AnvilError::network(Op::Import, "fetch", e))?;
                if !out.success {
                    return Err(AnvilError::network(
                        Op::Import,
                        "fetch",
                        format!("failed to download {}: {}", url, out.best_message()),
                    ));
                }
                Ok(out.stdout)
            }
        }
    }
}

/// Only the `groups:` section of an imported document is read.
#[derive(Debug, Deserialize)]
struct GroupsDocument {
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
}

pub fn parse_groups(content: &str) -> Result<BTreeMap<String, Vec<String>>, AnvilError> {
    let doc: GroupsDocument = serde_yaml::from_str(content)
        .map_err(|e| AnvilError::configuration(Op::Import, "parse", e))?;
    if doc.groups.is_empty() {
        return Err(AnvilError::configuration(
            Op::Import,
            "no-groups",
            "no valid groups found in import file",
        ));
    }

    for (group, tools) in &doc.groups {
        validate_group_name(group)
            .map_err(|e| AnvilError::validation(Op::Import, "validate-groups", e))?;
        if tools.is_empty() {
            return Err(AnvilError::validation(
                Op::Import,
                "validate-groups",
                format!("group '{}' has no tools", group),
            ));
        }
        for tool in tools {
            validate_app_name(tool).map_err(|e| {
                AnvilError::validation(Op::Import, "validate-groups", e)
                    .with_context(format!("group '{}'", group))
            })?;
        }
    }
    Ok(doc.groups)
}

/// Imported group names that already exist locally.
pub fn conflicts(settings: &Settings, groups: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    groups
        .keys()
        .filter(|g| settings.groups.contains_key(*g))
        .cloned()
        .collect()
}

pub async fn run(
    store: &ConfigStore,
    source: &str,
    yes: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let source = ImportSource::parse(source);
    ui::header("Importing groups");

    let content = source.read(cancel).await?;
    let groups = parse_groups(&content)?;
    ui::success(&format!("Found {} valid groups", groups.len()));

    let settings = store.load()?;
    let existing = conflicts(&settings, &groups);
    if !existing.is_empty() {
        return Err(AnvilError::configuration(
            Op::Import,
            "group-conflicts",
            format!("groups already exist: {}", existing.join(", ")),
        )
        .into());
    }
    ui::success("No conflicts detected");

    println!();
    for (group, tools) in &groups {
        println!("  {} ({} tools)", group.bold(), tools.len());
        for (i, tool) in tools.iter().enumerate() {
            let branch = if i + 1 == tools.len() { "└──" } else { "├──" };
            println!("    {} {}", branch.dimmed(), tool);
        }
    }
    println!();

    if !yes && !ui::confirm("Proceed with importing these groups?")? {
        ui::skip("Import cancelled");
        return Ok(());
    }

    let count = groups.len();
    store
        .add_groups(groups)
        .context("Failed to save imported groups")?;
    ui::success(&format!("Imported {} groups", count));
    Ok(())
}
