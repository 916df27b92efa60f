mod brew;
mod commands;
mod config;
mod doctor;
mod error;
mod fsutil;
mod git;
mod installer;
mod presence;
mod process;
mod sync;
#[cfg(test)]
mod testing;
mod ui;
mod validation;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::commands::doctor::DoctorArgs;
use crate::commands::install::InstallArgs;
use crate::config::ConfigStore;

#[derive(Parser)]
#[command(name = "anvil")]
#[command(about = "macOS development environment automation: installs, dotfile sync and health checks")]
#[command(version)]
struct Cli {
    /// Show what would happen without making changes
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Verbose output and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create ~/.anvil, write default settings and install required tools
    Init {
        /// Do not install Homebrew or the required tools
        #[arg(long)]
        skip_tools: bool,
    },

    /// Install a group of tools or a single app
    Install {
        /// Group or app name
        target: Option<String>,

        /// Install a group with several workers at once
        #[arg(long)]
        concurrent: bool,

        /// Worker count for --concurrent (default: CPU count)
        #[arg(long)]
        workers: Option<usize>,

        /// Per-tool timeout in minutes
        #[arg(long)]
        timeout: Option<u64>,

        /// Add the installed app to this group instead of installed_apps
        #[arg(long)]
        group_name: Option<String>,

        /// List groups and tracked apps
        #[arg(short, long)]
        list: bool,
    },

    /// Pull, push, sync, show and import configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Run health checks, optionally fixing what can be fixed
    Doctor {
        /// Check name or category (runs everything if not specified)
        target: Option<String>,

        /// List categories and checks
        #[arg(short, long)]
        list: bool,

        /// Fix failing checks, optionally only one check or category
        #[arg(long, num_args = 0..=1, value_name = "CHECK|CATEGORY")]
        fix: Option<Option<String>>,

        /// Apply fixes without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Empty ~/.anvil except settings.yaml
    Clean {
        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Update anvil to the latest release
    Update,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Copy a directory from the dotfiles repository into ~/.anvil/temp
    Pull {
        /// Repository directory (default: anvil)
        directory: Option<String>,
    },

    /// Push settings or an app's config to a new branch
    Push {
        /// App name (pushes settings.yaml if not specified)
        app: Option<String>,
    },

    /// Apply pulled files to their local destination, archiving what was there
    Sync {
        /// App name (syncs settings.yaml if not specified)
        app: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Print settings.yaml or a pulled directory
    Show {
        /// Pulled directory
        directory: Option<String>,
    },

    /// Import groups from a YAML file or URL
    Import {
        /// Path or http(s) URL
        source: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "anvil=debug" } else { "anvil=warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Every message in the chain, skipping causes already quoted by their parent.
fn render_error(err: &anyhow::Error) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let message = cause.to_string();
        if parts.last().is_some_and(|prev| prev.contains(&message)) {
            continue;
        }
        parts.push(message);
    }
    parts.join(": ")
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let store = ConfigStore::global()?;

    match cli.command {
        Commands::Init { skip_tools } => commands::init::run(store, skip_tools, cancel).await,

        Commands::Install {
            target,
            concurrent,
            workers,
            timeout,
            group_name,
            list,
        } => {
            let args = InstallArgs {
                target,
                dry_run: cli.dry_run,
                concurrent,
                workers,
                timeout,
                group_name,
                list,
            };
            commands::install::run(store, args, cancel).await
        }

        Commands::Config { command } => match command {
            ConfigCommands::Pull { directory } => {
                commands::pull::run(store, directory.as_deref(), cancel).await
            }
            ConfigCommands::Push { app } => commands::push::run(store, app.as_deref(), cancel).await,
            ConfigCommands::Sync { app, yes } => {
                commands::sync::run(store, app.as_deref(), yes, cli.dry_run, cancel)
            }
            ConfigCommands::Show { directory } => commands::show::run(store, directory.as_deref()),
            ConfigCommands::Import { source, yes } => {
                commands::import::run(store, &source, yes, cancel).await
            }
        },

        Commands::Doctor {
            target,
            list,
            fix,
            yes,
        } => {
            let args = DoctorArgs {
                target,
                list,
                fix,
                verbose: cli.verbose,
                yes,
            };
            commands::doctor::run(store, args, cancel).await
        }

        Commands::Clean { force } => commands::clean::run(store, cli.dry_run, force),

        Commands::Update => commands::update::run(cli.dry_run, cancel).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling running work");
            signal.cancel();
        }
    });

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), render_error(&err));
            ExitCode::FAILURE
        }
    }
}
