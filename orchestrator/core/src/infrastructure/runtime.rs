// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

use crate::domain::runtime::{
    ContainerDescriptor, ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState,
    LaunchMode, RuntimeError,
};
use crate::domain::transfer::ImageInfo;

/// Runs each container as a process group started by the nymph. Restored
/// containers are recreated by the checkpoint engine, so a restore-mode
/// launch only prepares the container directory.
pub struct ProcessRuntime {
    root: PathBuf,
}

impl ProcessRuntime {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            root: work_dir.as_ref().join("containers"),
        }
    }

    fn container_dir(&self, rank: u32) -> PathBuf {
        self.root.join(rank.to_string())
    }
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only performs the permission and existence check.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        if spec.args.is_empty() {
            return Err(RuntimeError::CreateFailed("container args cannot be empty".to_string()));
        }

        let dir = self.container_dir(spec.rank.value());
        if dir.join(crate::domain::runtime::STATE_FILE).exists() {
            return Err(RuntimeError::CreateFailed(format!(
                "rank {} already has a container at {}",
                spec.rank,
                dir.display()
            )));
        }
        tokio::fs::create_dir_all(&dir).await?;

        let descriptor = ContainerDescriptor {
            rank: spec.rank,
            id: spec.id.clone(),
            args: spec.args.clone(),
        };
        descriptor.write_to(&dir).await?;

        info!(rank = %spec.rank, id = %spec.id, "Created container");
        Ok(ContainerHandle {
            rank: spec.rank,
            id: spec.id,
            args: spec.args,
            pid: None,
            dir,
        })
    }

    async fn load(&self, info: &ImageInfo, dir: &Path) -> Result<ContainerHandle, RuntimeError> {
        let target = self.container_dir(info.rank.value());
        if dir != target {
            if target.exists() {
                warn!(rank = %info.rank, "Replacing stale container directory {}", target.display());
                tokio::fs::remove_dir_all(&target).await?;
            }
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::rename(dir, &target).await?;
        }

        let descriptor = ContainerDescriptor::read_from(&target).await?;
        if descriptor.rank != info.rank || descriptor.id != info.id {
            return Err(RuntimeError::StateFile(format!(
                "image announced {}/{} but state file holds {}/{}",
                info.rank, info.id, descriptor.rank, descriptor.id
            )));
        }

        Ok(ContainerHandle {
            rank: descriptor.rank,
            id: descriptor.id,
            args: descriptor.args,
            pid: None,
            dir: target,
        })
    }

    async fn launch(&self, handle: &mut ContainerHandle, mode: LaunchMode) -> Result<(), RuntimeError> {
        match mode {
            LaunchMode::Restore => {
                if !handle.checkpoints_dir().is_dir() {
                    return Err(RuntimeError::LaunchFailed(format!(
                        "no checkpoints under {}",
                        handle.dir.display()
                    )));
                }
                Ok(())
            }
            LaunchMode::Run => {
                let (program, args) = handle
                    .args
                    .split_first()
                    .ok_or_else(|| RuntimeError::LaunchFailed("container args cannot be empty".to_string()))?;

                let mut child = Command::new(program)
                    .args(args)
                    .current_dir(&handle.dir)
                    .process_group(0)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| RuntimeError::LaunchFailed(format!("{}: {}", program, e)))?;

                let pid = child
                    .id()
                    .ok_or_else(|| RuntimeError::LaunchFailed("process exited immediately".to_string()))?;
                handle.pid = Some(pid);

                let rank = handle.rank;
                tokio::spawn(async move {
                    match child.wait().await {
                        Ok(status) => info!(rank = %rank, %status, "Container process exited"),
                        Err(e) => warn!(rank = %rank, "Failed to wait for container process: {}", e),
                    }
                });

                info!(rank = %handle.rank, pid, "Launched container");
                Ok(())
            }
        }
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerState, RuntimeError> {
        Ok(match handle.pid {
            None => ContainerState::Created,
            Some(pid) if pid_alive(pid) => ContainerState::Running,
            Some(_) => ContainerState::Stopped,
        })
    }

    async fn signal(&self, handle: &ContainerHandle, signal: i32) -> Result<(), RuntimeError> {
        let pid = handle.pid.ok_or(RuntimeError::NotRunning)?;
        // SAFETY: plain kill(2) with a caller-provided signal number.
        if unsafe { libc::kill(pid as libc::pid_t, signal) } != 0 {
            return Err(RuntimeError::SignalFailed(format!(
                "pid {}: {}",
                pid,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        if let Some(pid) = handle.pid {
            // SAFETY: kill(2) on the container's process group, then on the root pid.
            unsafe {
                if libc::kill(-(pid as libc::pid_t), libc::SIGKILL) != 0 {
                    libc::kill(pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }

        match tokio::fs::remove_dir_all(&handle.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(rank = %handle.rank, "Destroyed container");
        Ok(())
    }
}
