// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator commands: migrate, signal, locations, nymphs

use anyhow::{Context, Result};
use colored::Colorize;

use ferry_core::domain::node_config::NodeConfigManifest;
use ferry_core::domain::{Location, Rank};
use ferry_core::infrastructure::CoordinatorClient;

fn client(config: &NodeConfigManifest) -> Result<CoordinatorClient> {
    CoordinatorClient::new(config.spec.coordinator.base_url())
}

pub async fn migrate(config: &NodeConfigManifest, rank: u32, dest: String, pre_dump: bool) -> Result<()> {
    let client = client(config)?;
    let rank = Rank::new(rank);
    let dest = Location::new(dest);

    println!("Migrating rank {} to {}...", rank, dest);

    client
        .migrate(rank, dest.clone(), pre_dump)
        .await
        .with_context(|| format!("Migration of rank {} to {} failed", rank, dest))?;

    println!("{}", format!("✓ Rank {} now runs on {}", rank, dest).green());
    Ok(())
}

pub async fn signal(config: &NodeConfigManifest, signal: i32) -> Result<()> {
    let client = client(config)?;

    client
        .signal(signal)
        .await
        .with_context(|| format!("Failed to deliver signal {}", signal))?;

    println!("{}", format!("✓ Signal {} delivered to every rank", signal).green());
    Ok(())
}

pub async fn locations(config: &NodeConfigManifest) -> Result<()> {
    let client = client(config)?;
    let entries = client
        .locations()
        .await
        .with_context(|| format!("Failed to query coordinator at {}", client.base_url()))?;

    if entries.is_empty() {
        println!("{}", "No ranks registered".dimmed());
        return Ok(());
    }

    println!("{:<8} {}", "RANK".bold(), "LOCATION".bold());
    for entry in entries {
        println!("{:<8} {}", entry.rank.to_string(), entry.location);
    }
    Ok(())
}

pub async fn nymphs(config: &NodeConfigManifest) -> Result<()> {
    let client = client(config)?;
    let nymphs = client
        .nymphs()
        .await
        .with_context(|| format!("Failed to query coordinator at {}", client.base_url()))?;

    if nymphs.is_empty() {
        println!("{}", "No nymphs registered".dimmed());
        return Ok(());
    }

    println!("{}", "LOCATION".bold());
    for location in nymphs {
        println!("{}", location);
    }
    Ok(())
}
