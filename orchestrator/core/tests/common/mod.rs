// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process nymphs: directory-backed runtime, a fake checkpoint engine that
//! speaks the real wire format, and a loopback transfer channel.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use ferry_core::application::RecipientManager;
use ferry_core::domain::errors::MigrationError;
use ferry_core::domain::rank::{Location, Rank};
use ferry_core::domain::runtime::{
    ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LaunchMode, OpenFileLister,
    RuntimeError,
};
use ferry_core::domain::transfer::{
    FileData, FileInfo, ImageInfo, LinkInfo, RecipientChannel, RecipientConnector,
};
use ferry_core::infrastructure::criu::wire::{
    CriuNotify, CriuReq, CriuReqType, CriuResp, CriuRestoreResp,
};
use ferry_core::infrastructure::criu::{EngineConnection, EngineLauncher};

pub const PAGES: &str = "pages-1.img";
pub const PAGES_LEN: usize = 10_000;

pub fn page_bytes() -> Vec<u8> {
    (0..PAGES_LEN).map(|i| (i % 251) as u8).collect()
}

/// Keeps containers as directories under `root`; `Run` assigns pid 4242.
pub struct DirRuntime {
    root: PathBuf,
    pub destroyed: Mutex<Vec<Rank>>,
    pub signals: Mutex<Vec<(Rank, i32)>>,
}

impl DirRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            destroyed: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DirRuntime {
    async fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
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
        Ok(ContainerHandle {
            rank: info.rank,
            id: info.id.clone(),
            args: info.args.clone(),
            pid: None,
            dir: dir.to_path_buf(),
        })
    }

    async fn launch(&self, handle: &mut ContainerHandle, mode: LaunchMode) -> Result<(), RuntimeError> {
        if mode == LaunchMode::Run {
            handle.pid = Some(4242);
        }
        Ok(())
    }

    async fn status(&self, handle: &ContainerHandle) -> Result<ContainerState, RuntimeError> {
        Ok(match handle.pid {
            Some(_) => ContainerState::Running,
            None => ContainerState::Created,
        })
    }

    async fn signal(&self, handle: &ContainerHandle, signal: i32) -> Result<(), RuntimeError> {
        self.signals.lock().push((handle.rank, signal));
        Ok(())
    }

    async fn destroy(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.destroyed.lock().push(handle.rank);
        Ok(())
    }
}

pub struct NoOpenFiles;

impl OpenFileLister for NoOpenFiles {
    fn open_files(&self, _root_pid: u32, _prefix: &Path) -> Result<Vec<PathBuf>, RuntimeError> {
        Ok(Vec::new())
    }
}

fn notify(script: &str) -> CriuResp {
    CriuResp {
        r#type: CriuReqType::Notify as i32,
        success: true,
        notify: Some(CriuNotify {
            script: Some(script.to_string()),
            pid: None,
        }),
        ..Default::default()
    }
}

fn finished(kind: CriuReqType, success: bool) -> CriuResp {
    CriuResp {
        r#type: kind as i32,
        success,
        cr_errmsg: (!success).then(|| "fake engine failure".to_string()),
        ..Default::default()
    }
}

/// What the fake engine did, in order, across every instance it launched.
#[derive(Default)]
pub struct EngineJournal {
    pub events: Vec<String>,
    /// Image directory of each restore, with the files it held at request time.
    pub restores: Vec<(PathBuf, Vec<String>)>,
}

/// Checkpoint engine double. It resolves the image directory from the fd in
/// the request, writes page images on dump and reports a pid on restore.
pub struct FakeCriu {
    pub journal: Arc<Mutex<EngineJournal>>,
    pub restored_pid: i32,
    pub fail_restore: bool,
}

impl FakeCriu {
    pub fn new(journal: Arc<Mutex<EngineJournal>>) -> Self {
        Self {
            journal,
            restored_pid: 9001,
            fail_restore: false,
        }
    }

    pub fn failing_restore(mut self) -> Self {
        self.fail_restore = true;
        self
    }
}

#[async_trait]
impl EngineLauncher for FakeCriu {
    async fn launch(&self, _target_pid: Option<u32>) -> Result<Box<dyn EngineConnection>, MigrationError> {
        Ok(Box::new(FakeCriuConnection {
            journal: self.journal.clone(),
            pending: VecDeque::new(),
            label: "idle",
            restored_pid: self.restored_pid,
            fail_restore: self.fail_restore,
        }))
    }
}

struct FakeCriuConnection {
    journal: Arc<Mutex<EngineJournal>>,
    pending: VecDeque<CriuResp>,
    label: &'static str,
    restored_pid: i32,
    fail_restore: bool,
}

fn images_dir(request: &CriuReq) -> Result<PathBuf, MigrationError> {
    let fd = request
        .opts
        .as_ref()
        .map(|o| o.images_dir_fd)
        .ok_or_else(|| MigrationError::EngineProtocolError("request without options".to_string()))?;
    Ok(std::fs::read_link(format!("/proc/self/fd/{}", fd))?)
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

impl FakeCriuConnection {
    fn dump_images(&self, request: &CriuReq) -> Result<(), MigrationError> {
        let dir = images_dir(request)?;
        std::fs::write(dir.join(PAGES), page_bytes())?;
        let pid = request.opts.as_ref().and_then(|o| o.pid).unwrap_or_default();
        std::fs::write(dir.join(format!("core-{}.img", pid)), b"core")?;
        if let Some(parent) = request.opts.as_ref().and_then(|o| o.parent_img.clone()) {
            std::os::unix::fs::symlink(parent, dir.join("parent"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EngineConnection for FakeCriuConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), MigrationError> {
        let request = CriuReq::decode(frame.as_slice())
            .map_err(|e| MigrationError::EngineProtocolError(e.to_string()))?;

        match CriuReqType::try_from(request.r#type).ok() {
            Some(CriuReqType::PreDump) => {
                self.label = "pre-dump";
                self.dump_images(&request)?;
                self.pending = VecDeque::from([finished(CriuReqType::PreDump, true)]);
            }
            Some(CriuReqType::Dump) => {
                self.label = "dump";
                self.dump_images(&request)?;
                self.pending = VecDeque::from([
                    notify("pre-dump"),
                    notify("post-dump"),
                    finished(CriuReqType::Dump, true),
                ]);
            }
            Some(CriuReqType::Restore) => {
                self.label = "restore";
                let dir = images_dir(&request)?;
                let files = list_files(&dir);
                self.journal.lock().restores.push((dir, files));
                self.pending = if self.fail_restore {
                    VecDeque::from([notify("pre-restore"), finished(CriuReqType::Restore, false)])
                } else {
                    VecDeque::from([
                        notify("pre-restore"),
                        notify("post-restore"),
                        CriuResp {
                            r#type: CriuReqType::Restore as i32,
                            success: true,
                            restore: Some(CriuRestoreResp {
                                pid: self.restored_pid,
                            }),
                            ..Default::default()
                        },
                    ])
                };
            }
            Some(CriuReqType::Notify) => {}
            other => {
                return Err(MigrationError::EngineProtocolError(format!(
                    "fake engine cannot handle {:?}",
                    other
                )))
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, MigrationError> {
        let Some(response) = self.pending.pop_front() else {
            return Ok(None);
        };
        let outcome = match response.notify_script() {
            Some(script) => script.to_string(),
            None if response.success => "success".to_string(),
            None => "error".to_string(),
        };
        self.journal.lock().events.push(format!("{}:{}", self.label, outcome));
        Ok(Some(response.encode_to_vec()))
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

/// Transfer session delivered straight into a recipient's session table.
pub struct LoopbackChannel {
    manager: Arc<RecipientManager>,
    session: Uuid,
}

impl LoopbackChannel {
    pub fn new(manager: Arc<RecipientManager>) -> Self {
        Self {
            manager,
            session: Uuid::new_v4(),
        }
    }
}

#[async_trait]
impl RecipientChannel for LoopbackChannel {
    async fn image_info(&self, info: ImageInfo) -> Result<u64, MigrationError> {
        self.manager.image_info(self.session, info).await
    }

    async fn link_info(&self, link: LinkInfo) -> Result<u64, MigrationError> {
        self.manager.link_info(self.session, link).await
    }

    async fn file_info(&self, info: FileInfo) -> Result<u64, MigrationError> {
        self.manager.file_info(self.session, info).await
    }

    async fn file_data(&self, data: FileData) -> Result<u64, MigrationError> {
        self.manager.file_data(self.session, data).await
    }

    async fn relaunch(&self) -> Result<u64, MigrationError> {
        self.manager.relaunch(self.session).await
    }
}

/// Routes sessions to the recipient registered for the destination location.
#[derive(Default, Clone)]
pub struct LoopbackConnector {
    recipients: Arc<Mutex<HashMap<Location, Arc<RecipientManager>>>>,
}

impl LoopbackConnector {
    pub fn attach(&self, location: Location, manager: Arc<RecipientManager>) {
        self.recipients.lock().insert(location, manager);
    }
}

struct UnreachableChannel(Location);

#[async_trait]
impl RecipientChannel for UnreachableChannel {
    async fn image_info(&self, _info: ImageInfo) -> Result<u64, MigrationError> {
        Err(MigrationError::TransportUnavailable(self.0.to_string()))
    }

    async fn link_info(&self, _link: LinkInfo) -> Result<u64, MigrationError> {
        Err(MigrationError::TransportUnavailable(self.0.to_string()))
    }

    async fn file_info(&self, _info: FileInfo) -> Result<u64, MigrationError> {
        Err(MigrationError::TransportUnavailable(self.0.to_string()))
    }

    async fn file_data(&self, _data: FileData) -> Result<u64, MigrationError> {
        Err(MigrationError::TransportUnavailable(self.0.to_string()))
    }

    async fn relaunch(&self) -> Result<u64, MigrationError> {
        Err(MigrationError::TransportUnavailable(self.0.to_string()))
    }
}

impl RecipientConnector for LoopbackConnector {
    fn connect(&self, dest: &Location, session: Uuid) -> Box<dyn RecipientChannel> {
        match self.recipients.lock().get(dest) {
            Some(manager) => Box::new(LoopbackChannel {
                manager: manager.clone(),
                session,
            }),
            None => Box::new(UnreachableChannel(dest.clone())),
        }
    }
}
