pub mod clean;
pub mod doctor;
pub mod import;
pub mod init;
pub mod install;
pub mod pull;
pub mod push;
pub mod show;
pub mod sync;
pub mod update;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::brew::{Homebrew, PackageManager};
use crate::error::{AnvilError, Op};
use crate::presence::{AppPresenceOracle, SystemHost};

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}

/// Commands that drive Homebrew or the installer script only run on macOS.
pub fn ensure_macos(op: Op) -> Result<(), AnvilError> {
    if cfg!(target_os = "macos") {
        return Ok(());
    }
    Err(AnvilError::platform(
        op,
        "platform-check",
        format!(
            "anvil {} is only supported on macOS (detected {})",
            op,
            std::env::consts::OS
        ),
    ))
}

pub fn package_manager() -> (Arc<dyn PackageManager>, Arc<AppPresenceOracle>) {
    let pm: Arc<dyn PackageManager> = Arc::new(Homebrew::new());
    let oracle = Arc::new(AppPresenceOracle::new(Arc::clone(&pm), Arc::new(SystemHost)));
    (pm, oracle)
}
