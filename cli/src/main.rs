// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Ferry
//!
//! The `ferry` binary runs both daemons of a migration cluster and is the
//! operator's client for them.
//!
//! ## Commands
//!
//! - `ferry coordinator` - Run the coordinator (control actor, scheduler, API)
//! - `ferry nymph` - Run the per-node daemon hosting containers
//! - `ferry container run|delete|list` - Manage containers on a nymph
//! - `ferry migrate|signal|locations|nymphs` - Talk to the coordinator
//! - `ferry config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use ferry_cli::commands::{self, ConfigCommand, ContainerCommand};
use ferry_cli::daemon;
use ferry_core::domain::node_config::NodeConfigManifest;

/// Ferry - live migration of ranked containers between nodes
#[derive(Parser)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "FERRY_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FERRY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator daemon
    #[command(name = "coordinator")]
    Coordinator,

    /// Run the nymph daemon on this node
    #[command(name = "nymph")]
    Nymph {
        /// Location to register as (default: from config, else hostname)
        #[arg(long)]
        location: Option<String>,
    },

    /// Container operations against a nymph
    #[command(name = "container")]
    Container {
        #[command(subcommand)]
        command: ContainerCommand,
    },

    /// Move a rank to another nymph
    #[command(name = "migrate")]
    Migrate {
        rank: u32,

        /// Destination location
        dest: String,

        /// Ship a pre-dump generation before the final dump
        #[arg(long)]
        pre_dump: bool,
    },

    /// Deliver a signal to every registered rank
    #[command(name = "signal")]
    Signal {
        /// Signal number (e.g. 15 for SIGTERM)
        signal: i32,
    },

    /// List rank locations known to the coordinator
    #[command(name = "locations")]
    Locations,

    /// List registered nymphs in slot order
    #[command(name = "nymphs")]
    Nymphs,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Coordinator) => {
            let config = load_config(cli.config)?;
            daemon::coordinator::start_coordinator(config).await
        }
        Some(Commands::Nymph { location }) => {
            let mut config = load_config(cli.config)?;
            if location.is_some() {
                config.spec.nymph.location = location;
            }
            daemon::nymph::start_nymph(config).await
        }
        Some(Commands::Container { command }) => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            commands::container::handle_command(command, &config).await
        }
        Some(Commands::Migrate { rank, dest, pre_dump }) => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            commands::cluster::migrate(&config, rank, dest, pre_dump).await
        }
        Some(Commands::Signal { signal }) => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            commands::cluster::signal(&config, signal).await
        }
        Some(Commands::Locations) => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            commands::cluster::locations(&config).await
        }
        Some(Commands::Nymphs) => {
            let config = NodeConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            commands::cluster::nymphs(&config).await
        }
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Daemons refuse to start on an invalid manifest.
fn load_config(path: Option<PathBuf>) -> Result<NodeConfigManifest> {
    let config = NodeConfigManifest::load_or_default(path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
