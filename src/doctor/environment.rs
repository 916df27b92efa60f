use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use super::{Category, CheckResult, DoctorContext, Registry, Status, Validator};
use crate::config::{DIR_MODE, FILE_MODE};
use crate::validation::validate_settings;

pub(super) fn register(registry: &mut Registry) {
    registry.register(Box::new(InitRun));
    registry.register(Box::new(SettingsFile));
    registry.register(Box::new(DirectoryStructure));
}

struct InitRun;

#[async_trait]
impl Validator for InitRun {
    fn name(&self) -> &'static str {
        "init-run"
    }

    fn category(&self) -> Category {
        Category::Environment
    }

    fn description(&self) -> &'static str {
        "Verify anvil initialization has been completed"
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let paths = ctx.store.paths();
        let settings = paths.settings_file();

        if !paths.root().is_dir() {
            return self
                .report(Status::Fail, "Anvil directory structure missing")
                .with_detail(format!("Directory not found: {}", paths.root().display()))
                .with_fix_hint("Run 'anvil init' to recreate directory structure");
        }
        if !settings.exists() {
            return self
                .report(Status::Fail, "Anvil has not been initialized")
                .with_detail(format!("Settings file not found at {}", settings.display()))
                .with_fix_hint("Run 'anvil init' to set up your environment");
        }

        self.report(Status::Pass, "Anvil initialization complete")
            .with_detail(format!("Settings file found at {}", settings.display()))
    }
}

/// Exists, has mode 0644, parses and passes the settings invariants.
struct SettingsFile;

#[async_trait]
impl Validator for SettingsFile {
    fn name(&self) -> &'static str {
        "settings-file"
    }

    fn category(&self) -> Category {
        Category::Environment
    }

    fn description(&self) -> &'static str {
        "Validate settings.yaml file exists and is valid"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let path = ctx.store.paths().settings_file();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => {
                return self
                    .report(Status::Fail, "Settings file does not exist")
                    .with_detail(format!("Expected file: {}", path.display()))
                    .with_fix_hint("Run 'anvil init' to create settings file")
            }
        };

        let settings = match ctx.settings() {
            Ok(settings) => settings,
            Err(e) => {
                return self
                    .report(Status::Fail, "Settings file is not valid YAML")
                    .with_detail(format!("{:#}", e))
                    .with_fix_hint(format!("Check YAML syntax in {}", path.display()))
            }
        };

        if let Err(e) = validate_settings(&settings) {
            return self
                .report(Status::Fail, "Settings file failed validation")
                .with_detail(e.to_string())
                .with_fix_hint(format!("Edit {} and correct the value", path.display()));
        }

        let mode = metadata.permissions().mode() & 0o777;
        if mode != FILE_MODE {
            return self
                .report(Status::Warn, "Settings file has incorrect permissions")
                .with_detail(format!("Current: {:o}, Expected: {:o}", mode, FILE_MODE))
                .with_fix_hint(format!("Run 'chmod {:o} {}'", FILE_MODE, path.display()))
                .fixable(true);
        }

        self.report(Status::Pass, "Settings file is valid")
            .with_detail(format!("File: {}", path.display()))
    }

    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        let path = ctx.store.paths().settings_file();
        fs::set_permissions(&path, fs::Permissions::from_mode(FILE_MODE))
            .with_context(|| format!("Failed to fix file permissions: {}", path.display()))
    }
}

struct DirectoryStructure;

#[async_trait]
impl Validator for DirectoryStructure {
    fn name(&self) -> &'static str {
        "directory-structure"
    }

    fn category(&self) -> Category {
        Category::Environment
    }

    fn description(&self) -> &'static str {
        "Verify anvil directory structure is correct"
    }

    fn can_fix(&self) -> bool {
        true
    }

    async fn validate(&self, ctx: &DoctorContext<'_>) -> CheckResult {
        let paths = ctx.store.paths();
        let required = [
            paths.root().to_path_buf(),
            paths.temp_dir(),
            paths.archive_dir(),
        ];

        let missing: Vec<String> = required
            .iter()
            .filter(|d| !d.is_dir())
            .map(|d| d.display().to_string())
            .collect();
        if !missing.is_empty() {
            return self
                .report(Status::Fail, "Directory structure incomplete")
                .with_details(missing)
                .with_fix_hint("Missing directories will be created automatically")
                .fixable(true);
        }

        for dir in &required {
            let Ok(metadata) = fs::metadata(dir) else {
                continue;
            };
            let mode = metadata.permissions().mode() & 0o777;
            if mode != DIR_MODE {
                return self
                    .report(Status::Warn, "Directory has incorrect permissions")
                    .with_detail(format!(
                        "Directory: {}, Current: {:o}, Expected: {:o}",
                        dir.display(),
                        mode,
                        DIR_MODE
                    ))
                    .with_fix_hint("Directory permissions will be corrected")
                    .fixable(true);
            }
        }

        self.report(Status::Pass, "Directory structure is correct")
            .with_detail(format!("Base directory: {}", paths.root().display()))
    }

    async fn fix(&self, ctx: &DoctorContext<'_>) -> Result<()> {
        ctx.store.paths().create_directories()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnvilPaths, ConfigStore};
    use crate::doctor::tests::{context, initialized_store};
    use crate::doctor::{Doctor, FixOutcome};
    use crate::testing::{FakeHost, FakePackageManager};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_run_without_settings() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(AnvilPaths::new(temp.path().join(".anvil")));
        store.paths().create_directories().unwrap();
        let ctx = context(&store, temp.path(), Arc::new(FakePackageManager::new()), FakeHost::default());

        let result = InitRun.validate(&ctx).await;
        assert_eq!(result.status, Status::Fail);
        assert_eq!(result.message, "Anvil has not been initialized");
    }

    #[tokio::test]
    async fn test_settings_file_permissions_fix() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        let path = store.paths().settings_file();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));
        let before = doctor.run_check("settings-file").await.unwrap();
        assert_eq!(before.status, Status::Warn);
        assert!(before.auto_fix);

        let outcome = doctor.fix_check("settings-file").await.unwrap();
        assert!(matches!(outcome, FixOutcome::Fixed(ref r) if r.status == Status::Pass));
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_settings_file_invalid_document() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        store
            .update(|s| {
                s.groups.remove("dev");
                Ok(true)
            })
            .unwrap();
        let ctx = context(&store, temp.path(), Arc::new(FakePackageManager::new()), FakeHost::default());

        let result = SettingsFile.validate(&ctx).await;
        assert_eq!(result.status, Status::Fail);
        assert!(result.details[0].contains("'dev'"));
    }

    #[tokio::test]
    async fn test_directory_structure_fix_recreates_temp() {
        let temp = TempDir::new().unwrap();
        let store = initialized_store(temp.path());
        fs::remove_dir_all(store.paths().temp_dir()).unwrap();

        let doctor = Doctor::new(context(
            &store,
            temp.path(),
            Arc::new(FakePackageManager::new()),
            FakeHost::default(),
        ));
        let before = doctor.run_check("directory-structure").await.unwrap();
        assert!(before.is_fail());

        let outcome = doctor.fix_check("directory-structure").await.unwrap();
        assert!(outcome.succeeded());
        assert!(store.paths().temp_dir().is_dir());
    }
}
