// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hand-written fakes for the runtime, network and transfer seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::errors::MigrationError;
use crate::domain::rank::Rank;
use crate::domain::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LaunchMode, NetworkEndpoint,
    NetworkManager, OpenFileLister, RuntimeError,
};
use crate::domain::transfer::{FileData, FileInfo, ImageInfo, LinkInfo, RecipientChannel, SEQUENCE_BASE};

/// Runtime that keeps containers as plain directories under `root`.
pub struct FakeRuntime {
    pub root: PathBuf,
    pub calls: Mutex<Vec<String>>,
    pub fail_destroy: Mutex<bool>,
}

impl FakeRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            calls: Mutex::new(Vec::new()),
            fail_destroy: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.calls.lock().push(format!("create:{}", spec.rank));
        let handle = ContainerHandle {
            rank: spec.rank,
            id: spec.id,
            args: spec.args,
            pid: None,
            dir: self.root.join(spec.rank.to_string()),
        };
        std::fs::create_dir_all(handle.checkpoints_dir())?;
        handle.descriptor().write_to(&handle.dir).await?;
        Ok(handle)
    }

    async fn load(&self, info: &ImageInfo, dir: &Path) -> Result<ContainerHandle, RuntimeError> {
        self.calls.lock().push(format!("load:{}", info.rank));
        Ok(ContainerHandle {
            rank: info.rank,
            id: info.id.clone(),
            args: info.args.clone(),
            pid: None,
            dir: dir.to_path_buf(),
        })
    }

    async fn launch(&self, handle: &mut ContainerHandle, mode: LaunchMode) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("launch:{}:{:?}", handle.rank, mode));
        if mode == LaunchMode::Run {
            handle.pid = Some(4242);
        }
        Ok(())
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerState, RuntimeError> {
        Ok(if handle.pid.is_some() {
            ContainerState::Running
        } else {
            ContainerState::Created
        })
    }

    async fn signal(&self, handle: &ContainerHandle, signal: i32) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("signal:{}:{}", handle.rank, signal));
        handle.pid.map(|_| ()).ok_or(RuntimeError::NotRunning)
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("destroy:{}", handle.rank));
        if *self.fail_destroy.lock() {
            return Err(RuntimeError::LaunchFailed("scripted destroy failure".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNetwork {
    pub restored: Mutex<Vec<Rank>>,
}

#[async_trait]
impl NetworkManager for FakeNetwork {
    async fn declare_external(&self, rank: Rank) -> Result<Option<NetworkEndpoint>, RuntimeError> {
        Ok(Some(NetworkEndpoint {
            external: format!("veth[eth0]:ferry{}", rank),
        }))
    }

    async fn post_restore(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.restored.lock().push(handle.rank);
        Ok(())
    }
}

/// Reports a fixed list of open files regardless of the process.
#[derive(Default)]
pub struct StaticOpenFiles(pub Vec<PathBuf>);

impl OpenFileLister for StaticOpenFiles {
    fn open_files(&self, _root_pid: u32, _prefix: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageInfo(ImageInfo),
    LinkInfo(LinkInfo),
    FileInfo(FileInfo),
    FileData(Vec<u8>),
    Relaunch,
}

/// Recipient channel that accepts everything and records it. A [`SeqFault`]
/// misnumbers the reply to the n-th call.
pub struct RecordingChannel {
    pub calls: Mutex<Vec<Call>>,
    pub trace: Arc<Mutex<Vec<String>>>,
    next: Mutex<u64>,
    fault: Option<(usize, SeqFault)>,
}

/// How a [`RecordingChannel`] misnumbers one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFault {
    /// Jumps one number ahead.
    Skip,
    /// Hands out the previous number again.
    Repeat,
}

impl RecordingChannel {
    pub fn new(trace: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            trace,
            next: Mutex::new(SEQUENCE_BASE),
            fault: None,
        }
    }

    pub fn skipping_at(mut self, call: usize) -> Self {
        self.fault = Some((call, SeqFault::Skip));
        self
    }

    pub fn repeating_at(mut self, call: usize) -> Self {
        self.fault = Some((call, SeqFault::Repeat));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Bytes received for the file announced under `filename`.
    pub fn file_bytes(&self, filename: &str) -> Option<Vec<u8>> {
        let calls = self.calls.lock();
        let start = calls
            .iter()
            .position(|c| matches!(c, Call::FileInfo(info) if info.filename == filename))?;
        let mut bytes = Vec::new();
        for call in &calls[start + 1..] {
            match call {
                Call::FileData(data) => bytes.extend_from_slice(data),
                _ => break,
            }
        }
        Some(bytes)
    }

    fn record(&self, call: Call, label: &str) -> Result<u64, MigrationError> {
        let index = {
            let mut calls = self.calls.lock();
            calls.push(call);
            calls.len()
        };
        self.trace.lock().push(format!("transfer:{}", label));
        let mut next = self.next.lock();
        match self.fault {
            Some((at, SeqFault::Skip)) if at == index => *next += 1,
            Some((at, SeqFault::Repeat)) if at == index => return Ok(*next - 1),
            _ => {}
        }
        let seq = *next;
        *next += 1;
        Ok(seq)
    }
}

#[async_trait]
impl RecipientChannel for RecordingChannel {
    async fn image_info(&self, info: ImageInfo) -> Result<u64, MigrationError> {
        self.record(Call::ImageInfo(info), "image-info")
    }

    async fn link_info(&self, link: LinkInfo) -> Result<u64, MigrationError> {
        self.record(Call::LinkInfo(link), "link-info")
    }

    async fn file_info(&self, info: FileInfo) -> Result<u64, MigrationError> {
        self.record(Call::FileInfo(info), "file-info")
    }

    async fn file_data(&self, data: FileData) -> Result<u64, MigrationError> {
        self.record(Call::FileData(data.data), "file-data")
    }

    async fn relaunch(&self) -> Result<u64, MigrationError> {
        self.record(Call::Relaunch, "relaunch")
    }
}
