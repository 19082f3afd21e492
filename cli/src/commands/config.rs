// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use ferry_core::domain::node_config::NodeConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with default values
    Generate {
        /// Output path (default: ./ferry-config.yaml)
        #[arg(short, long, default_value = "./ferry-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, force } => generate(&output, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NodeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. FERRY_CONFIG_PATH: {}",
            std::env::var("FERRY_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./ferry-config.yaml");
        println!("  4. ~/.ferry/config.yaml");
        println!("  5. /etc/ferry/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let coordinator = &config.spec.coordinator;
    println!("{}", "Coordinator:".bold());
    println!("  URL: {}", coordinator.base_url());
    println!("  Bind: {}:{}", coordinator.bind_address, coordinator.port);
    if coordinator.scheduler.enabled {
        println!("  Scheduler: every {:?}", coordinator.scheduler.period);
    } else {
        println!("  Scheduler: {}", "disabled".dimmed());
    }
    println!();

    let nymph = &config.spec.nymph;
    println!("{}", "Nymph:".bold());
    println!("  Location: {}", nymph.location());
    println!("  Bind: {}:{}", nymph.bind_address, nymph.port);
    println!("  Work dir: {}", nymph.work_dir.display());
    println!("  Network: {}", nymph.network);
    println!("  Registration backoff: {:?}", nymph.registration_backoff);
    println!();

    let migration = &config.spec.migration;
    println!("{}", "Migration:".bold());
    println!("  CRIU: {}", migration.criu_path.display());
    println!("  Run dir: {}", migration.run_dir.display());
    println!("  Chunk size: {} bytes", migration.chunk_size);
    println!("  Open file prefix: {}", migration.open_file_prefix.display());
    println!();

    if let Some(port) = config.spec.observability.as_ref().and_then(|o| o.metrics_port) {
        println!("{}", "Observability:".bold());
        println!("  Metrics: :{}/metrics", port);
        println!();
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, force: bool) -> Result<()> {
    write_default_config(output, force)?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

fn write_default_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite",
            output.display()
        );
    }

    NodeConfigManifest::default()
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry-config.yaml");

        write_default_config(&path, false).unwrap();

        let config = NodeConfigManifest::from_yaml_file(&path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.spec.nymph.port, 8991);
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry-config.yaml");
        std::fs::write(&path, "keep me").unwrap();

        assert!(write_default_config(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");

        write_default_config(&path, true).unwrap();
        assert!(NodeConfigManifest::from_yaml_file(&path).is_ok());
    }
}
