use anyhow::{Context, Result};
use colored::Colorize;
use std::fs;
use std::path::Path;

use crate::config::{AppLocation, ConfigStore};
use crate::error::{AnvilError, Op};
use crate::fsutil;
use crate::ui;

pub fn run(store: &ConfigStore, directory: Option<&str>) -> Result<()> {
    let Some(directory) = directory else {
        return show_settings(store);
    };

    let staged = store.paths().staged(directory);
    if !staged.exists() {
        ui::warn(&format!("Nothing pulled for '{}'", directory));
        if let Some(AppLocation::Configured(path)) = store.resolve_app_location(directory)? {
            ui::info(&format!("Local config for '{}' lives at {}", directory, path.display()));
        }
        let pulled = pulled_directories(&store.paths().temp_dir())?;
        if pulled.is_empty() {
            ui::info("Nothing has been pulled yet. Run 'anvil config pull <directory>'");
        } else {
            ui::info("Pulled so far:");
            for name in &pulled {
                ui::info(&format!("  {}", name));
            }
        }
        let configured = store.configured_apps()?;
        if !configured.is_empty() {
            ui::info(&format!("Apps with a configs entry: {}", configured.join(", ")));
        }
        return Ok(());
    }

    let files = fsutil::list_files(&staged)?;
    if let [only] = files.as_slice() {
        let path = staged.join(only);
        ui::header(&path.display().to_string());
        print!("{}", read(&path)?);
        return Ok(());
    }

    ui::header(&format!("{} ({} files)", staged.display(), files.len()));
    for line in fsutil::tree_lines(&staged)? {
        println!("  {}", line);
    }
    Ok(())
}

fn show_settings(store: &ConfigStore) -> Result<()> {
    let path = store.paths().settings_file();
    if !path.exists() {
        return Err(AnvilError::configuration(
            Op::Show,
            "read-settings",
            format!(
                "settings file not found at {}. Run 'anvil init' first",
                path.display()
            ),
        )
        .into());
    }
    println!("{}", format!("# {}", path.display()).dimmed());
    print!("{}", read(&path)?);
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

fn pulled_directories(temp: &Path) -> Result<Vec<String>> {
    if !temp.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(temp)
        .with_context(|| format!("Failed to read directory: {}", temp.display()))?
    {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
