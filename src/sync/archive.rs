use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::info;

use super::Target;
use crate::fsutil;

pub fn archive_prefix(target: &Target) -> String {
    match target {
        Target::Settings => "anvil-settings".to_string(),
        Target::App(app) => format!("{}-configs", app),
    }
}

/// `<prefix>-YYYY-MM-DD-HH-MM-SS`
pub fn archive_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{}-{}", prefix, now.format("%Y-%m-%d-%H-%M-%S"))
}

/// Creates a fresh archive directory under `archive_root` and copies
/// `destination` into it when it exists. A directory keeps its structure; a
/// single file lands at the archive root under its own name.
pub fn create_archive(
    archive_root: &Path,
    prefix: &str,
    destination: &Path,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    let base = archive_root.join(archive_name(prefix, now));
    let mut archive = base.clone();
    let mut n = 1;
    while archive.exists() {
        archive = PathBuf::from(format!("{}-{}", base.display(), n));
        n += 1;
    }
    fsutil::ensure_dir(&archive)?;

    if destination.is_dir() {
        fsutil::copy_dir(destination, &archive)
            .with_context(|| format!("Failed to archive {}", destination.display()))?;
    } else if destination.exists() {
        let name = destination
            .file_name()
            .with_context(|| format!("Invalid destination: {}", destination.display()))?;
        fsutil::copy_file(destination, &archive.join(name))
            .with_context(|| format!("Failed to archive {}", destination.display()))?;
    }

    info!(archive = %archive.display(), "archived");
    Ok(archive)
}
