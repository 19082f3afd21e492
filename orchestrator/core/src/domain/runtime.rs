// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::rank::Rank;
use crate::domain::transfer::ImageInfo;

/// Name of the serialized container descriptor inside a container directory.
pub const STATE_FILE: &str = "state.json";

/// Directory (relative to the container directory) holding checkpoint generations.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// What a caller asks the runtime to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub rank: Rank,
    pub id: String,
    pub args: Vec<String>,
}

/// Contents of `state.json`, written by the runtime and shipped first during a
/// migration so the recipient can verify identity before accepting the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub rank: Rank,
    pub id: String,
    pub args: Vec<String>,
}

impl ContainerDescriptor {
    pub async fn read_from(dir: &Path) -> Result<Self, RuntimeError> {
        let path = dir.join(STATE_FILE);
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| RuntimeError::StateFile(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&raw)
            .map_err(|e| RuntimeError::StateFile(format!("{}: {}", path.display(), e)))
    }

    pub async fn write_to(&self, dir: &Path) -> Result<(), RuntimeError> {
        let path = dir.join(STATE_FILE);
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|e| RuntimeError::StateFile(e.to_string()))?;
        tokio::fs::write(&path, raw)
            .await
            .map_err(|e| RuntimeError::StateFile(format!("{}: {}", path.display(), e)))
    }
}

/// A container known to the local runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub rank: Rank,
    pub id: String,
    pub args: Vec<String>,
    /// Root process of the container tree, once launched.
    pub pid: Option<u32>,
    /// Container directory: `state.json` plus `checkpoints/<generation>/`.
    pub dir: PathBuf,
}

impl ContainerHandle {
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.dir.join(CHECKPOINTS_DIR)
    }

    pub fn generation_dir(&self, generation: u32) -> PathBuf {
        self.checkpoints_dir().join(generation.to_string())
    }

    /// First generation number not yet present under `checkpoints/`.
    pub fn next_generation(&self) -> u32 {
        let Ok(entries) = std::fs::read_dir(self.checkpoints_dir()) else {
            return 0;
        };
        entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
            .max()
            .map(|g| g + 1)
            .unwrap_or(0)
    }

    pub fn descriptor(&self) -> ContainerDescriptor {
        ContainerDescriptor {
            rank: self.rank,
            id: self.id.clone(),
            args: self.args.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Start the container's init process from scratch.
    Run,
    /// Prepare the container so the checkpoint engine can recreate its processes.
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to create container: {0}")]
    CreateFailed(String),
    #[error("Failed to launch container: {0}")]
    LaunchFailed(String),
    #[error("Container has no running process")]
    NotRunning,
    #[error("Failed to deliver signal: {0}")]
    SignalFailed(String),
    #[error("Invalid container state file: {0}")]
    StateFile(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Container lifecycle as seen by the migration protocol.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    /// Rebuild a handle from a received image placed in `dir`.
    async fn load(&self, info: &ImageInfo, dir: &Path) -> Result<ContainerHandle, RuntimeError>;

    async fn launch(&self, handle: &mut ContainerHandle, mode: LaunchMode) -> Result<(), RuntimeError>;

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerState, RuntimeError>;

    async fn signal(&self, handle: &ContainerHandle, signal: i32) -> Result<(), RuntimeError>;

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}

/// An externally created network resource the checkpoint engine must reattach
/// on restore, expressed in the engine's `external` syntax (e.g. `veth[eth0]:vethA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub external: String,
}

#[async_trait]
pub trait NetworkManager: Send + Sync {
    async fn declare_external(&self, rank: Rank) -> Result<Option<NetworkEndpoint>, RuntimeError>;

    async fn post_restore(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;
}

/// Finds the regular files a container's process tree holds open under `prefix`.
pub trait OpenFileLister: Send + Sync {
    fn open_files(&self, root_pid: u32, prefix: &Path) -> Result<Vec<PathBuf>, RuntimeError>;
}
