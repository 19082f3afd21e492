// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Container commands, sent directly to a nymph
//!
//! Commands: run, delete, list

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use ferry_core::domain::node_config::NodeConfigManifest;
use ferry_core::domain::runtime::{ContainerSpec, ContainerState};
use ferry_core::domain::{Location, Rank};
use ferry_core::infrastructure::NymphClient;

#[derive(Subcommand)]
pub enum ContainerCommand {
    /// Start a container on a nymph and register its rank
    Run {
        /// Nymph to run on
        #[arg(short, long)]
        location: String,

        /// Rank of the new container
        #[arg(short, long)]
        rank: u32,

        /// Container id (default: rank-<RANK>)
        #[arg(long)]
        id: Option<String>,

        /// Command line of the container process
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },

    /// Destroy a container hosted by a nymph
    Delete {
        #[arg(short, long)]
        location: String,

        #[arg(short, long)]
        rank: u32,
    },

    /// List containers hosted by a nymph
    List {
        #[arg(short, long)]
        location: String,
    },
}

pub async fn handle_command(command: ContainerCommand, config: &NodeConfigManifest) -> Result<()> {
    let client = NymphClient::new(config.spec.nymph.port)?;

    match command {
        ContainerCommand::Run {
            location,
            rank,
            id,
            args,
        } => {
            let location = Location::new(location);
            let spec = ContainerSpec {
                rank: Rank::new(rank),
                id: id.unwrap_or_else(|| format!("rank-{}", rank)),
                args,
            };
            let summary = client
                .run_container(&location, &spec)
                .await
                .with_context(|| format!("Failed to run rank {} on {}", rank, location))?;

            let pid = summary.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "{}",
                format!("✓ Rank {} started on {} (pid {})", summary.rank, location, pid).green()
            );
            Ok(())
        }
        ContainerCommand::Delete { location, rank } => {
            let location = Location::new(location);
            client
                .delete_container(&location, Rank::new(rank))
                .await
                .with_context(|| format!("Failed to delete rank {} on {}", rank, location))?;
            println!("{}", format!("✓ Rank {} deleted from {}", rank, location).green());
            Ok(())
        }
        ContainerCommand::List { location } => {
            let location = Location::new(location);
            let containers = client
                .list_containers(&location)
                .await
                .with_context(|| format!("Failed to list containers on {}", location))?;

            if containers.is_empty() {
                println!("{}", format!("No containers on {}", location).dimmed());
                return Ok(());
            }

            println!(
                "{:<8} {:<20} {:<10} {}",
                "RANK".bold(),
                "ID".bold(),
                "PID".bold(),
                "STATE".bold()
            );
            for c in containers {
                let pid = c.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
                println!("{:<8} {:<20} {:<10} {}", c.rank.to_string(), c.id, pid, colored_state(c.state));
            }
            Ok(())
        }
    }
}

fn colored_state(state: ContainerState) -> colored::ColoredString {
    match state {
        ContainerState::Running => "running".green(),
        ContainerState::Created => "created".yellow(),
        ContainerState::Stopped => "stopped".red(),
    }
}
