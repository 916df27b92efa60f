use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DIR_MODE;

pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))
            .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    }
    Ok(())
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst).with_context(|| {
        format!("Failed to copy {} to {}", src.display(), dst.display())
    })?;
    Ok(())
}

/// Recursively copies `src` into `dst`, skipping any `.git` directory.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("Failed to strip prefix")?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read symlink: {}", entry.path().display()))?;
            if target.exists() || target.is_symlink() {
                fs::remove_file(&target).ok();
            }
            std::os::unix::fs::symlink(&link, &target)
                .with_context(|| format!("Failed to create symlink: {}", target.display()))?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Copies a file or a directory tree to `dst`.
pub fn copy_path(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir(src, dst)
    } else {
        copy_file(src, dst)
    }
}

/// Deletes `dst` (file or tree) when it exists.
pub fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    } else if path.exists() || path.is_symlink() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display()))?;
    }
    Ok(())
}

/// Files under `root`, relative to it, sorted.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(root.file_name().map(PathBuf::from).into_iter().collect());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .context("Failed to strip prefix")?;
        files.push(relative.to_path_buf());
    }
    files.sort();
    Ok(files)
}

/// Removes everything inside `dir` and keeps `dir` itself. Returns the paths
/// that could not be removed.
pub fn remove_dir_contents(dir: &Path) -> Result<Vec<(PathBuf, anyhow::Error)>> {
    let mut failures = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                failures.push((dir.to_path_buf(), e.into()));
                continue;
            }
        };
        if let Err(e) = remove_path(&path) {
            failures.push((path, e));
        }
    }

    Ok(failures)
}

/// Indented listing of a directory tree, directories suffixed with `/`.
pub fn tree_lines(root: &Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    let entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Failed to walk {}", root.display()))?;

    for entry in entries {
        let indent = "  ".repeat(entry.depth() - 1);
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            lines.push(format!("{}{}/", indent, name));
        } else {
            lines.push(format!("{}{}", indent, name));
        }
    }
    Ok(lines)
}
