use anyhow::Result;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::ensure_macos;
use crate::error::{AnvilError, Op};
use crate::process::{command_exists, Cmd};
use crate::ui;

const INSTALL_SCRIPT_URL: &str =
    "https://github.com/rocajuanma/anvil/releases/latest/download/install.sh";

const UPDATE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

fn update_command() -> String {
    format!("curl -sSL {} | bash", INSTALL_SCRIPT_URL)
}

pub async fn run(dry_run: bool, cancel: &CancellationToken) -> Result<()> {
    ensure_macos(Op::Update)?;
    if !command_exists("curl") {
        return Err(AnvilError::platform(
            Op::Update,
            "check-curl",
            "curl is required to download the latest release",
        )
        .into());
    }

    let command = update_command();
    ui::header("Updating anvil to the latest release");
    if dry_run {
        ui::info(&format!("Would run: {}", command));
        ui::dry_run_notice();
        return Ok(());
    }

    ui::info(&format!("Running: {}", command));
    let out = Cmd::new("bash")
        .args(["-c", command.as_str()])
        .timeout(UPDATE_TIMEOUT)
        .output(cancel)
        .await
        .map_err(|e| AnvilError::network(Op::Update, "install-script", e))?;
    if !out.success {
        return Err(AnvilError::network(
            Op::Update,
            "install-script",
            format!("update failed: {}", out.best_message()),
        )
        .into());
    }

    ui::success("anvil updated. Run 'anvil --version' to confirm");
    Ok(())
}
