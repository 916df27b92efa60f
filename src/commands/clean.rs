use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AnvilPaths, ConfigStore, ARCHIVE_DIR, CONFIG_FILE, TEMP_DIR};
use crate::fsutil;
use crate::ui;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanAction {
    /// temp/ and archive/ are kept but emptied.
    Empty,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanItem {
    pub path: PathBuf,
    pub action: CleanAction,
}

/// Everything under the anvil directory except the settings file.
pub fn plan(paths: &AnvilPaths) -> Result<Vec<CleanItem>> {
    let root = paths.root();
    let mut items = Vec::new();
    for entry in
        fs::read_dir(root).with_context(|| format!("Failed to read directory: {}", root.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        if name == CONFIG_FILE {
            continue;
        }
        let path = entry.path();
        let keep = path.is_dir() && (name == TEMP_DIR || name == ARCHIVE_DIR);
        if keep && is_empty_dir(&path) {
            continue;
        }
        items.push(CleanItem {
            path,
            action: if keep {
                CleanAction::Empty
            } else {
                CleanAction::Remove
            },
        });
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
}

/// Performs `items`, returning one warning per path that could not be removed.
pub fn execute(paths: &AnvilPaths, items: &[CleanItem]) -> Vec<String> {
    let mut warnings = Vec::new();
    for item in items {
        let result = match item.action {
            CleanAction::Empty => fsutil::remove_dir_contents(&item.path).map(|failures| {
                for (path, e) in failures {
                    warnings.push(format!("Failed to remove {}: {:#}", path.display(), e));
                }
            }),
            CleanAction::Remove => fsutil::remove_path(&item.path),
        };
        if let Err(e) = result {
            warnings.push(format!("Failed to clean {}: {:#}", item.path.display(), e));
        }
    }

    for dir in [paths.temp_dir(), paths.archive_dir()] {
        if let Err(e) = fsutil::ensure_dir(&dir) {
            warnings.push(format!("{:#}", e));
        }
    }
    warnings
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

pub fn run(store: &ConfigStore, dry_run: bool, force: bool) -> Result<()> {
    let paths = store.paths();
    ui::header("Cleaning anvil directories");

    if !paths.root().exists() {
        ui::warn(&format!(
            "{} does not exist. Nothing to clean",
            paths.root().display()
        ));
        return Ok(());
    }

    let items = plan(paths)?;
    if items.is_empty() {
        ui::success("Nothing to clean. Only settings.yaml remains");
        return Ok(());
    }

    for item in &items {
        let name = item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let note = match item.action {
            CleanAction::Empty => "(empty)",
            CleanAction::Remove => "(remove)",
        };
        println!("  {} {}", name, note.dimmed());
    }

    if dry_run {
        ui::dry_run_notice();
        return Ok(());
    }
    if !force
        && !ui::confirm(&format!(
            "Clean {} items under {}? This cannot be undone",
            items.len(),
            paths.root().display()
        ))?
    {
        ui::skip("Clean cancelled");
        return Ok(());
    }

    let warnings = execute(paths, &items);
    for warning in &warnings {
        ui::warn(warning);
    }
    ui::success(&format!(
        "Cleaned {} items; {} was kept",
        items.len() - warnings.len().min(items.len()),
        CONFIG_FILE
    ));
    Ok(())
}
