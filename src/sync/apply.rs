use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{archive_prefix, create_archive, SyncEngine, Target, SETTINGS_TARGET};
use crate::config::CONFIG_FILE;
use crate::error::{AnvilError, Op};
use crate::fsutil;

/// Resolved source and destination of a sync, shown to the user before confirming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub target: Target,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub plan: SyncPlan,
    /// Empty when the destination did not exist yet.
    pub archive: PathBuf,
    pub files: Vec<PathBuf>,
}

/// A single-file config is pushed as `<app>/<file name>`, so the staged
/// directory holds the file rather than being the file. Use that file when the
/// destination is a file, or when it is new and the pull brought back only it.
fn single_file_source(staged: &Path, destination: &Path) -> PathBuf {
    let Some(name) = destination.file_name() else {
        return staged.to_path_buf();
    };
    let candidate = staged.join(name);
    if destination.is_file() {
        return candidate;
    }
    if !destination.exists() && candidate.is_file() {
        let only_file = fs::read_dir(staged)
            .map(|entries| entries.filter_map(|e| e.ok()).count() == 1)
            .unwrap_or(false);
        if only_file {
            return candidate;
        }
    }
    staged.to_path_buf()
}

impl SyncEngine<'_> {
    pub fn plan_sync(&self, target: &Target) -> Result<SyncPlan, AnvilError> {
        let paths = self.store.paths();
        let (source, destination) = match target {
            Target::Settings => (
                paths.staged(SETTINGS_TARGET).join(CONFIG_FILE),
                paths.settings_file(),
            ),
            Target::App(app) => {
                let destination = self
                    .store
                    .app_config_path(app)
                    .map_err(|e| AnvilError::configuration(Op::Sync, "load-config", e))?
                    .ok_or_else(|| {
                        AnvilError::configuration(
                            Op::Sync,
                            "resolve-destination",
                            format!(
                                "app config path not defined for '{app}'. Add it to {}:\n  configs:\n    {app}: /path/to/{app}/config",
                                paths.settings_file().display()
                            ),
                        )
                    })?;
                let staged = paths.staged(app);
                (single_file_source(&staged, &destination), destination)
            }
        };

        if !source.exists() {
            return Err(AnvilError::configuration(
                Op::Sync,
                "resolve-source",
                format!(
                    "config not pulled yet. Run 'anvil config pull {}' first",
                    target.name()
                ),
            )
            .with_context(source.display().to_string()));
        }

        Ok(SyncPlan {
            target: target.clone(),
            source,
            destination,
        })
    }

    /// Archives the destination, then copies the staged files over it.
    pub fn apply(&self, plan: &SyncPlan) -> Result<SyncReport, AnvilError> {
        let archive = create_archive(
            &self.store.paths().archive_dir(),
            &archive_prefix(&plan.target),
            &plan.destination,
            (self.clock)(),
        )
        .map_err(|e| AnvilError::filesystem(Op::Sync, "archive", e))?;

        fsutil::copy_path(&plan.source, &plan.destination)
            .map_err(|e| AnvilError::filesystem(Op::Sync, "copy-config", e))?;

        if plan.target == Target::Settings {
            self.store
                .invalidate()
                .map_err(|e| AnvilError::configuration(Op::Sync, "reload-config", e))?;
        }

        let files = fsutil::list_files(&plan.source)
            .map_err(|e| AnvilError::filesystem(Op::Sync, "list-files", e))?;
        info!(target = plan.target.name(), files = files.len(), "synced");

        Ok(SyncReport {
            plan: plan.clone(),
            archive,
            files,
        })
    }
}
