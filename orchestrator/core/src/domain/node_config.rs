// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema shared by the coordinator and nymph daemons:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Coordinator endpoint and rebalancing scheduler
// - Nymph endpoint, work directory and registration backoff
// - Checkpoint engine and transfer settings
// - Observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::rank::Location;
use crate::domain::transfer::CHUNK_SIZE;

pub const API_VERSION: &str = "ferry.dev/v1";
pub const KIND: &str = "NodeConfig";

/// Largest chunk the nymph HTTP body limit is sized for.
const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "ferry.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: NodeConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub nymph: NymphConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Host nymphs and operators use to reach the coordinator
    pub host: String,

    pub port: u16,

    /// Address the coordinator daemon binds to
    pub bind_address: String,

    pub scheduler: SchedulerConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8990,
            bind_address: "0.0.0.0".to_string(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Rebalancing scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NymphConfig {
    /// Location this nymph registers as (default: hostname)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub port: u16,

    pub bind_address: String,

    /// Root for container directories and incoming transfer sessions
    pub work_dir: PathBuf,

    /// Network manager used on restore ("host")
    pub network: String,

    #[serde(with = "humantime_serde")]
    pub registration_backoff: Duration,
}

impl Default for NymphConfig {
    fn default() -> Self {
        Self {
            location: None,
            port: 8991,
            bind_address: "0.0.0.0".to_string(),
            work_dir: PathBuf::from("/var/lib/ferry"),
            network: "host".to_string(),
            registration_backoff: Duration::from_secs(5),
        }
    }
}

impl NymphConfig {
    pub fn location(&self) -> Location {
        match &self.location {
            Some(location) => Location::new(location.clone()),
            None => {
                let host = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "localhost".to_string());
                if self.port == NymphConfig::default().port {
                    Location::new(host)
                } else {
                    Location::new(format!("{}:{}", host, self.port))
                }
            }
        }
    }
}

/// Checkpoint engine and transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub criu_path: PathBuf,

    /// Directory for engine control sockets and pidfiles
    pub run_dir: PathBuf,

    /// Engine verbosity (criu -v level)
    pub engine_log_level: u32,

    pub chunk_size: usize,

    /// Only open files under this prefix are shipped with a container
    pub open_file_prefix: PathBuf,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            criu_path: PathBuf::from("criu"),
            run_dir: PathBuf::from("/var/run"),
            engine_log_level: 4,
            chunk_size: CHUNK_SIZE,
            open_file_prefix: PathBuf::from("/tmp"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus exporter port; disabled when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "ferry-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. FERRY_CONFIG_PATH environment variable
    /// 2. ./ferry-config.yaml (working directory)
    /// 3. ~/.ferry/config.yaml (user home)
    /// 4. /etc/ferry/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FERRY_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./ferry-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ferry").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/ferry/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("FERRY_COORDINATOR_HOST") {
            tracing::info!("Environment override: FERRY_COORDINATOR_HOST={}", host);
            self.spec.coordinator.host = host;
        }

        if let Ok(val) = std::env::var("FERRY_COORDINATOR_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: FERRY_COORDINATOR_PORT={}", port);
                    self.spec.coordinator.port = port;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for FERRY_COORDINATOR_PORT: '{}'. Expected a port number. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(location) = std::env::var("FERRY_NYMPH_LOCATION") {
            tracing::info!("Environment override: FERRY_NYMPH_LOCATION={}", location);
            self.spec.nymph.location = Some(location);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let coordinator = &self.spec.coordinator;
        if coordinator.host.is_empty() {
            anyhow::bail!("spec.coordinator.host cannot be empty");
        }
        if coordinator.port == 0 {
            anyhow::bail!("spec.coordinator.port cannot be 0");
        }
        if coordinator.scheduler.period.is_zero() {
            anyhow::bail!("spec.coordinator.scheduler.period must be positive");
        }

        let nymph = &self.spec.nymph;
        if nymph.port == 0 {
            anyhow::bail!("spec.nymph.port cannot be 0");
        }
        if nymph.registration_backoff.is_zero() {
            anyhow::bail!("spec.nymph.registration_backoff must be positive");
        }
        if nymph.network != "host" {
            anyhow::bail!(
                "Unsupported spec.nymph.network '{}'. Supported: host",
                nymph.network
            );
        }
        if matches!(&nymph.location, Some(l) if l.is_empty()) {
            anyhow::bail!("spec.nymph.location cannot be empty when set");
        }

        let migration = &self.spec.migration;
        if migration.chunk_size == 0 || migration.chunk_size > MAX_CHUNK_SIZE {
            anyhow::bail!(
                "spec.migration.chunk_size must be between 1 and {} bytes",
                MAX_CHUNK_SIZE
            );
        }
        if !migration.open_file_prefix.is_absolute() {
            anyhow::bail!(
                "spec.migration.open_file_prefix must be absolute: {}",
                migration.open_file_prefix.display()
            );
        }

        Ok(())
    }
}
