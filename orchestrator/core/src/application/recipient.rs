// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Migration Recipient
//!
//! Receives a checkpoint image from a donor nymph, rebuilds it file by file
//! under a per-session directory and restores the container from it.
//!
//! A session is opened by its first `ImageInfo` and ends with `Relaunch`.
//! Every accepted call returns the next sequence number starting at
//! [`SEQUENCE_BASE`]; any failed call drops the session, leaving whatever was
//! already written on disk until the nymph's incoming directory is purged.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the receiving half of the migration protocol

use dashmap::DashMap;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::MigrationError;
use crate::domain::path_sanitizer::PathSanitizer;
use crate::domain::runtime::{
    ContainerDescriptor, ContainerHandle, ContainerRuntime, LaunchMode, NetworkManager, STATE_FILE,
};
use crate::domain::transfer::{FileData, FileInfo, FileKind, ImageInfo, LinkInfo, SEQUENCE_BASE};
use crate::infrastructure::criu::{CriuDriver, CriuEventKind, EngineLauncher};
use crate::infrastructure::repositories::InMemoryContainerRepository;

#[derive(Debug, Clone)]
pub struct RecipientConfig {
    /// Parent of the per-session receive directories.
    pub incoming_dir: PathBuf,
    pub open_file_prefix: PathBuf,
    pub engine_log_level: u32,
}

/// Collaborators needed to turn a received image into a running container.
#[derive(Clone)]
pub struct RecipientServices {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub network: Arc<dyn NetworkManager>,
    pub launcher: Arc<dyn EngineLauncher>,
    pub config: RecipientConfig,
}

struct OpenFile {
    path: PathBuf,
    file: tokio::fs::File,
    remaining: u64,
    modified: SystemTime,
}

/// State of one incoming session.
pub struct Recipient {
    session: Uuid,
    root: PathBuf,
    next_seq: u64,
    image: Option<ImageInfo>,
    current: Option<OpenFile>,
    sanitizer: PathSanitizer,
    open_file_prefix: PathBuf,
}

impl Recipient {
    pub fn new(session: Uuid, root: impl Into<PathBuf>, open_file_prefix: impl Into<PathBuf>) -> Self {
        Self {
            session,
            root: root.into(),
            next_seq: SEQUENCE_BASE,
            image: None,
            current: None,
            sanitizer: PathSanitizer::new(),
            open_file_prefix: open_file_prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accept(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn ensure_no_open_file(&self) -> Result<(), MigrationError> {
        match &self.current {
            Some(open) => Err(MigrationError::UnfinishedFile(open.path.display().to_string())),
            None => Ok(()),
        }
    }

    pub async fn image_info(&mut self, info: ImageInfo) -> Result<u64, MigrationError> {
        self.ensure_no_open_file()?;
        if let Some(previous) = &self.image {
            if previous.rank != info.rank || previous.id != info.id {
                return Err(MigrationError::IdentityMismatch(format!(
                    "session {} carries {}/{}, got {}/{}",
                    self.session, previous.rank, previous.id, info.rank, info.id
                )));
            }
        }
        tokio::fs::create_dir_all(&self.root).await?;
        info!(
            session = %self.session,
            rank = %info.rank,
            generation = info.generation,
            parent = ?info.parent,
            "Receiving image"
        );
        self.image = Some(info);
        Ok(self.accept())
    }

    pub async fn link_info(&mut self, link: LinkInfo) -> Result<u64, MigrationError> {
        self.ensure_no_open_file()?;
        let path = self.root.join(self.sanitizer.relative(&link.filename)?);
        self.sanitizer.contained_link(&self.root, &path, &link.target)?;
        // An existing link at `path` itself is replaced, not followed.
        reject_symlinks_below(&self.root, &path, false).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        tokio::fs::symlink(&link.target, &path).await?;
        debug!(file = %path.display(), target = %link.target, "Created symlink");
        Ok(self.accept())
    }

    pub async fn file_info(&mut self, info: FileInfo) -> Result<u64, MigrationError> {
        self.ensure_no_open_file()?;
        let path = self.sanitizer.resolve(
            &self.root,
            &info.filename,
            info.dir.as_deref(),
            &self.open_file_prefix,
        )?;
        let base = if info.dir.is_some() { &self.open_file_prefix } else { &self.root };
        reject_symlinks_below(base, &path, true).await?;
        let permissions = Permissions::from_mode(info.mode & 0o7777);

        if info.kind == FileKind::Dir {
            tokio::fs::create_dir_all(&path).await?;
            tokio::fs::set_permissions(&path, permissions).await?;
            return Ok(self.accept());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(info.mode & 0o7777)
            .open(&path)
            .await
            .map_err(|e| MigrationError::Io(format!("{}: {}", path.display(), e)))?;
        // The creation mode is filtered by the umask.
        tokio::fs::set_permissions(&path, permissions).await?;

        debug!(session = %self.session, file = %path.display(), size = info.size, "Receiving file");
        let open = OpenFile {
            path,
            file,
            remaining: info.size,
            modified: mod_time(info.mod_time_secs, info.mod_time_nanos),
        };
        if info.size == 0 {
            self.finish_file(open).await?;
        } else {
            self.current = Some(open);
        }
        Ok(self.accept())
    }

    pub async fn file_data(&mut self, data: FileData) -> Result<u64, MigrationError> {
        let received = data.data.len() as u64;
        let Some(open) = self.current.as_mut() else {
            return Err(MigrationError::UnexpectedSize { remaining: 0, received });
        };
        if received > open.remaining {
            return Err(MigrationError::UnexpectedSize {
                remaining: open.remaining,
                received,
            });
        }

        open.file.write_all(&data.data).await?;
        open.remaining -= received;
        metrics::counter!("ferry_transfer_bytes_total", "direction" => "received").increment(received);

        if open.remaining == 0 {
            if let Some(open) = self.current.take() {
                self.finish_file(open).await?;
            }
        }
        Ok(self.accept())
    }

    async fn finish_file(&self, mut open: OpenFile) -> Result<(), MigrationError> {
        open.file.flush().await?;
        let file = open.file.into_std().await;
        let modified = open.modified;
        tokio::task::spawn_blocking(move || file.set_modified(modified))
            .await
            .map_err(|e| {
                MigrationError::Io(format!("setting mtime of {}: {}", open.path.display(), e))
            })??;

        if open.path == self.root.join(STATE_FILE) {
            self.check_descriptor().await?;
        }
        Ok(())
    }

    /// The shipped state file must describe the container announced by ImageInfo.
    async fn check_descriptor(&self) -> Result<(), MigrationError> {
        let descriptor = ContainerDescriptor::read_from(&self.root)
            .await
            .map_err(|e| MigrationError::IdentityMismatch(e.to_string()))?;
        match &self.image {
            Some(image) if image.rank == descriptor.rank && image.id == descriptor.id => Ok(()),
            Some(image) => Err(MigrationError::IdentityMismatch(format!(
                "announced {}/{}, state file describes {}/{}",
                image.rank, image.id, descriptor.rank, descriptor.id
            ))),
            None => Err(MigrationError::IdentityMismatch(
                "state file received before image info".to_string(),
            )),
        }
    }

    /// Restores the container from the received image. Returns only after the
    /// checkpoint engine reported success.
    pub async fn relaunch(&mut self, services: &RecipientServices) -> Result<(u64, ContainerHandle), MigrationError> {
        self.ensure_no_open_file()?;
        let image = self
            .image
            .clone()
            .ok_or_else(|| MigrationError::IdentityMismatch("no image announced".to_string()))?;

        let mut handle = services.runtime.load(&image, &self.root).await?;
        let endpoint = services.network.declare_external(image.rank).await?;
        services.runtime.launch(&mut handle, LaunchMode::Restore).await?;

        let mut driver = CriuDriver::new(
            handle.generation_dir(image.generation),
            services.config.engine_log_level,
        );
        driver.launch(services.launcher.as_ref(), None).await?;
        driver
            .send_restore_request(endpoint.into_iter().map(|e| e.external).collect())
            .await?;

        loop {
            let Some(event) = driver.next_event().await? else {
                return Err(MigrationError::EngineProtocolError(
                    "event stream ended without a result".to_string(),
                ));
            };
            match event.kind {
                CriuEventKind::PostRestore => {
                    services.network.post_restore(&handle).await?;
                    driver.respond().await?;
                }
                CriuEventKind::Success => {
                    handle.pid = event.response.restore.map(|r| r.pid as u32);
                    break;
                }
                CriuEventKind::Error => {
                    return Err(MigrationError::EngineProtocolError(event.response.error_summary()))
                }
                _ => driver.respond().await?,
            }
        }
        driver.close();

        info!(session = %self.session, rank = %handle.rank, pid = ?handle.pid, "Container restored");
        Ok((self.accept(), handle))
    }
}

/// Fails when any existing component of `path` below `base` is a symlink,
/// so a write can never be redirected through links placed by the donor.
/// The last component is only checked when `include_leaf` is set.
async fn reject_symlinks_below(base: &Path, path: &Path, include_leaf: bool) -> Result<(), MigrationError> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| MigrationError::PathRejected(format!("{} is outside {}", path.display(), base.display())))?;

    let mut current = base.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        if components.peek().is_none() && !include_leaf {
            break;
        }
        match tokio::fs::symlink_metadata(&current).await {
            Ok(meta) if meta.file_type().is_symlink() => {
                warn!(path = %path.display(), link = %current.display(), "Refusing to write through symlink");
                return Err(MigrationError::PathRejected(format!(
                    "{} passes through symlink {}",
                    path.display(),
                    current.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn mod_time(secs: i64, nanos: u32) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + Duration::from_nanos(nanos as u64)
    }
}

/// Incoming sessions of one nymph, keyed by the donor's session id.
pub struct RecipientManager {
    sessions: DashMap<Uuid, Arc<Mutex<Recipient>>>,
    services: RecipientServices,
    containers: InMemoryContainerRepository,
}

impl RecipientManager {
    pub fn new(services: RecipientServices, containers: InMemoryContainerRepository) -> Self {
        Self {
            sessions: DashMap::new(),
            services,
            containers,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Removes leftovers of sessions interrupted by a previous run.
    pub async fn purge_incoming(&self) -> std::io::Result<()> {
        let dir = &self.services.config.incoming_dir;
        if tokio::fs::metadata(dir).await.is_ok() {
            tokio::fs::remove_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(dir).await
    }

    fn session(&self, session: Uuid) -> Result<Arc<Mutex<Recipient>>, MigrationError> {
        self.sessions
            .get(&session)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MigrationError::UnknownSession(session.to_string()))
    }

    fn settle<T>(&self, session: Uuid, result: Result<T, MigrationError>) -> Result<T, MigrationError> {
        if let Err(e) = &result {
            warn!(session = %session, "Dropping incoming session: {}", e);
            self.sessions.remove(&session);
        }
        result
    }

    /// Opens the session on first use.
    pub async fn image_info(&self, session: Uuid, info: ImageInfo) -> Result<u64, MigrationError> {
        let recipient = self
            .sessions
            .entry(session)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Recipient::new(
                    session,
                    self.services.config.incoming_dir.join(session.to_string()),
                    self.services.config.open_file_prefix.clone(),
                )))
            })
            .value()
            .clone();
        let result = recipient.lock().await.image_info(info).await;
        self.settle(session, result)
    }

    pub async fn link_info(&self, session: Uuid, link: LinkInfo) -> Result<u64, MigrationError> {
        let recipient = self.session(session)?;
        let result = recipient.lock().await.link_info(link).await;
        self.settle(session, result)
    }

    pub async fn file_info(&self, session: Uuid, info: FileInfo) -> Result<u64, MigrationError> {
        let recipient = self.session(session)?;
        let result = recipient.lock().await.file_info(info).await;
        self.settle(session, result)
    }

    pub async fn file_data(&self, session: Uuid, data: FileData) -> Result<u64, MigrationError> {
        let recipient = self.session(session)?;
        let result = recipient.lock().await.file_data(data).await;
        self.settle(session, result)
    }

    /// Restores the container and adds it to the local registry. Registration
    /// with the coordinator is left to the control actor that ordered the move.
    pub async fn relaunch(&self, session: Uuid) -> Result<u64, MigrationError> {
        let recipient = self.session(session)?;
        let result = recipient.lock().await.relaunch(&self.services).await;
        let (seq, handle) = self.settle(session, result)?;

        self.sessions.remove(&session);
        self.containers.insert(handle);
        Ok(seq)
    }
}
