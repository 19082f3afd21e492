// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Migration Donor
//!
//! Drives the checkpoint engine on the node currently hosting a container and
//! streams the resulting image to the recipient nymph.
//!
//! The transfer happens while the engine sits in its `post-dump` notification:
//! the process tree is frozen, the image is complete on disk, and the engine
//! will not kill the tree until the notification is acknowledged. The donor
//! therefore ships the image and waits for the recipient's relaunch before it
//! lets the engine finish.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the sending half of the migration protocol

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::errors::MigrationError;
use crate::domain::runtime::{ContainerHandle, ContainerRuntime, OpenFileLister, STATE_FILE};
use crate::domain::transfer::{
    FileData, FileInfo, FileKind, ImageInfo, LinkInfo, RecipientChannel, CHUNK_SIZE, SEQUENCE_BASE,
};
use crate::infrastructure::criu::{CriuDriver, CriuEventKind, EngineLauncher};

/// Sequence-checking wrapper around a [`RecipientChannel`].
pub struct MigrationClient<'a> {
    channel: &'a dyn RecipientChannel,
    last_seq: u64,
}

impl<'a> MigrationClient<'a> {
    pub fn new(channel: &'a dyn RecipientChannel) -> Self {
        Self {
            channel,
            last_seq: SEQUENCE_BASE - 1,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn accept(&mut self, got: u64) -> Result<(), MigrationError> {
        let expected = self.last_seq + 1;
        if got != expected {
            return Err(MigrationError::SequenceMismatch { expected, got });
        }
        self.last_seq = got;
        Ok(())
    }

    pub async fn image_info(&mut self, info: ImageInfo) -> Result<(), MigrationError> {
        let seq = self.channel.image_info(info).await?;
        self.accept(seq)
    }

    pub async fn link_info(&mut self, filename: String, target: String) -> Result<(), MigrationError> {
        let seq = self.channel.link_info(LinkInfo { filename, target }).await?;
        self.accept(seq)
    }

    pub async fn relaunch(&mut self) -> Result<(), MigrationError> {
        let seq = self.channel.relaunch().await?;
        self.accept(seq)
    }

    pub async fn send_dir(&mut self, path: &Path, filename: &str) -> Result<(), MigrationError> {
        let meta = tokio::fs::metadata(path).await?;
        let info = FileInfo {
            filename: filename.to_string(),
            dir: None,
            size: 0,
            mode: meta.mode() & 0o7777,
            mod_time_secs: meta.mtime(),
            mod_time_nanos: meta.mtime_nsec() as u32,
            kind: FileKind::Dir,
        };
        let seq = self.channel.file_info(info).await?;
        self.accept(seq)
    }

    /// Sends one FileInfo followed by `ceil(size / chunk_size)` FileData calls.
    pub async fn send_file(
        &mut self,
        path: &Path,
        filename: &str,
        dir: Option<String>,
        chunk_size: usize,
    ) -> Result<(), MigrationError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| MigrationError::Io(format!("{}: {}", path.display(), e)))?;
        let meta = file.metadata().await?;
        let size = meta.len();

        debug!(file = %path.display(), size, "Sending file");
        let info = FileInfo {
            filename: filename.to_string(),
            dir,
            size,
            mode: meta.mode() & 0o7777,
            mod_time_secs: meta.mtime(),
            mod_time_nanos: meta.mtime_nsec() as u32,
            kind: FileKind::File,
        };
        let seq = self.channel.file_info(info).await?;
        self.accept(seq)?;

        let mut remaining = size;
        while remaining > 0 {
            let len = remaining.min(chunk_size as u64) as usize;
            let mut data = vec![0u8; len];
            file.read_exact(&mut data).await.map_err(|e| {
                MigrationError::Io(format!("{} changed while sending: {}", path.display(), e))
            })?;
            let seq = self.channel.file_data(FileData { data }).await?;
            self.accept(seq)?;
            remaining -= len as u64;
            metrics::counter!("ferry_transfer_bytes_total", "direction" => "sent").increment(len as u64);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DonorConfig {
    pub chunk_size: usize,
    /// Only open files below this directory are shipped.
    pub open_file_prefix: PathBuf,
    pub engine_log_level: u32,
}

impl Default for DonorConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            open_file_prefix: PathBuf::from("/tmp"),
            engine_log_level: 4,
        }
    }
}

pub struct MigrationDonor {
    runtime: Arc<dyn ContainerRuntime>,
    launcher: Arc<dyn EngineLauncher>,
    open_files: Arc<dyn OpenFileLister>,
    config: DonorConfig,
}

impl MigrationDonor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        launcher: Arc<dyn EngineLauncher>,
        open_files: Arc<dyn OpenFileLister>,
        config: DonorConfig,
    ) -> Self {
        Self {
            runtime,
            launcher,
            open_files,
            config,
        }
    }

    /// Migrates `handle` through `channel`. On success the local container has
    /// been destroyed; on any error it is left running and intact.
    pub async fn migrate(
        &self,
        handle: &ContainerHandle,
        channel: &dyn RecipientChannel,
        pre_dump: bool,
        shutdown: &CancellationToken,
    ) -> Result<(), MigrationError> {
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(MigrationError::ShuttingDown),
            result = self.transfer(handle, channel, pre_dump) => result,
        };
        result?;

        if let Err(e) = self.runtime.destroy(handle).await {
            warn!(rank = %handle.rank, "Container migrated but local cleanup failed: {}", e);
        }
        Ok(())
    }

    async fn transfer(
        &self,
        handle: &ContainerHandle,
        channel: &dyn RecipientChannel,
        pre_dump: bool,
    ) -> Result<(), MigrationError> {
        let pid = handle
            .pid
            .ok_or_else(|| MigrationError::Runtime(format!("rank {} has no running process", handle.rank)))?;
        let mut client = MigrationClient::new(channel);

        let mut parent = None;
        if pre_dump {
            let generation = handle.next_generation();
            self.pre_dump(handle, pid, generation).await?;
            self.ship_generation(&mut client, handle, generation, None, None).await?;
            parent = Some(generation);
        }

        let generation = match parent {
            Some(p) => p + 1,
            None => handle.next_generation(),
        };
        let images = handle.generation_dir(generation);
        tokio::fs::create_dir_all(&images).await?;

        let mut driver = CriuDriver::new(&images, self.config.engine_log_level);
        driver.launch(self.launcher.as_ref(), Some(pid)).await?;
        driver
            .send_dump_request(parent.map(|p| format!("../{}", p)))
            .await?;

        let mut relaunched = false;
        loop {
            let Some(event) = driver.next_event().await? else {
                return Err(MigrationError::EngineProtocolError(
                    "event stream ended without a result".to_string(),
                ));
            };
            match event.kind {
                CriuEventKind::PostDump => {
                    info!(rank = %handle.rank, generation, "Image dumped, transferring");
                    self.ship_generation(&mut client, handle, generation, parent, Some(pid))
                        .await?;
                    client.relaunch().await?;
                    relaunched = true;
                    driver.respond().await?;
                }
                CriuEventKind::Success if relaunched => break,
                CriuEventKind::Success => {
                    return Err(MigrationError::EngineProtocolError(
                        "dump finished without a post-dump notification".to_string(),
                    ))
                }
                CriuEventKind::Error => {
                    return Err(MigrationError::EngineProtocolError(event.response.error_summary()))
                }
                _ => driver.respond().await?,
            }
        }

        driver.close();
        info!(rank = %handle.rank, seq = client.last_seq(), "Migration sent");
        Ok(())
    }

    /// Takes a memory pre-dump into `generation` while the container keeps running.
    async fn pre_dump(&self, handle: &ContainerHandle, pid: u32, generation: u32) -> Result<(), MigrationError> {
        let images = handle.generation_dir(generation);
        tokio::fs::create_dir_all(&images).await?;

        let mut driver = CriuDriver::new(&images, self.config.engine_log_level);
        driver.launch(self.launcher.as_ref(), Some(pid)).await?;
        driver.send_pre_dump_request().await?;

        loop {
            let Some(event) = driver.next_event().await? else {
                return Err(MigrationError::EngineProtocolError(
                    "event stream ended without a result".to_string(),
                ));
            };
            match event.kind {
                CriuEventKind::Success => break,
                CriuEventKind::Error => {
                    return Err(MigrationError::EngineProtocolError(event.response.error_summary()))
                }
                _ => driver.respond().await?,
            }
        }

        driver.close();
        info!(rank = %handle.rank, generation, "Pre-dump complete");
        Ok(())
    }

    /// ImageInfo, then the state file, then the generation's checkpoint tree,
    /// then (for the final dump) the container's open files.
    async fn ship_generation(
        &self,
        client: &mut MigrationClient<'_>,
        handle: &ContainerHandle,
        generation: u32,
        parent: Option<u32>,
        open_files_of: Option<u32>,
    ) -> Result<(), MigrationError> {
        let chunk = self.config.chunk_size;
        client
            .image_info(ImageInfo {
                rank: handle.rank,
                id: handle.id.clone(),
                args: handle.args.clone(),
                generation,
                parent,
            })
            .await?;
        client
            .send_file(&handle.dir.join(STATE_FILE), STATE_FILE, None, chunk)
            .await?;

        let tree = handle.generation_dir(generation);
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(tree)
                .sort_by_file_name()
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| MigrationError::Io(format!("checkpoint walk failed: {}", e)))?
        .map_err(|e| MigrationError::Io(e.to_string()))?;

        for entry in entries {
            let name = relative_name(&handle.dir, entry.path())?;
            let file_type = entry.file_type();
            if file_type.is_symlink() {
                let target = tokio::fs::read_link(entry.path()).await?;
                client
                    .link_info(name, target.to_string_lossy().into_owned())
                    .await?;
            } else if file_type.is_dir() {
                client.send_dir(entry.path(), &name).await?;
            } else {
                client.send_file(entry.path(), &name, None, chunk).await?;
            }
        }

        if let Some(pid) = open_files_of {
            let lister = self.open_files.clone();
            let prefix = self.config.open_file_prefix.clone();
            let files = tokio::task::spawn_blocking(move || lister.open_files(pid, &prefix))
                .await
                .map_err(|e| MigrationError::Runtime(format!("open file scan failed: {}", e)))??;
            for path in files {
                let (Some(name), Some(dir)) = (path.file_name(), path.parent()) else {
                    continue;
                };
                client
                    .send_file(
                        &path,
                        &name.to_string_lossy(),
                        Some(dir.to_string_lossy().into_owned()),
                        chunk,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

fn relative_name(base: &Path, path: &Path) -> Result<String, MigrationError> {
    path.strip_prefix(base)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| MigrationError::Io(format!("{} is outside {}", path.display(), base.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{Call, FakeRuntime, RecordingChannel, StaticOpenFiles};
    use crate::domain::rank::Rank;
    use crate::domain::runtime::ContainerSpec;
    use crate::infrastructure::criu::testing::{finished, notify, ScriptedLauncher};
    use crate::infrastructure::criu::wire::CriuReqType;
    use parking_lot::Mutex;

    struct Fixture {
        _dir: tempfile::TempDir,
        runtime: Arc<FakeRuntime>,
        handle: ContainerHandle,
        open_file: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(dir.path().join("containers")));
        let mut handle = runtime
            .create(ContainerSpec {
                rank: Rank(3),
                id: "job-3".into(),
                args: vec!["/bin/sleep".into(), "600".into()],
            })
            .await
            .unwrap();
        handle.pid = Some(4242);

        let open_dir = dir.path().join("tmp");
        std::fs::create_dir_all(&open_dir).unwrap();
        let open_file = open_dir.join("out.log");
        std::fs::write(&open_file, b"hello from rank 3").unwrap();

        Fixture {
            _dir: dir,
            runtime,
            handle,
            open_file,
        }
    }

    /// Writes image files into the newest generation directory on launch,
    /// the way the real engine fills the directory it was handed.
    struct ImageWritingLauncher {
        inner: Arc<ScriptedLauncher>,
        checkpoints: PathBuf,
    }

    #[async_trait::async_trait]
    impl EngineLauncher for ImageWritingLauncher {
        async fn launch(
            &self,
            target_pid: Option<u32>,
        ) -> Result<Box<dyn crate::infrastructure::criu::EngineConnection>, MigrationError> {
            let newest = std::fs::read_dir(&self.checkpoints)
                .unwrap()
                .flatten()
                .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
                .max()
                .unwrap();
            let dir = self.checkpoints.join(newest.to_string());
            std::fs::write(dir.join("pages-1.img"), vec![7u8; 5000]).unwrap();
            std::fs::write(dir.join("core-4242.img"), b"core").unwrap();
            if newest > 0 {
                std::os::unix::fs::symlink(format!("../{}", newest - 1), dir.join("parent")).unwrap();
            }
            self.inner.launch(target_pid).await
        }
    }

    fn donor(fx: &Fixture, launcher: Arc<ScriptedLauncher>, chunk_size: usize) -> MigrationDonor {
        MigrationDonor::new(
            fx.runtime.clone(),
            Arc::new(ImageWritingLauncher {
                inner: launcher,
                checkpoints: fx.handle.checkpoints_dir(),
            }),
            Arc::new(StaticOpenFiles(vec![fx.open_file.clone()])),
            DonorConfig {
                chunk_size,
                ..DonorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_transfer_happens_between_post_dump_and_success() {
        let fx = fixture().await;
        let trace = Arc::new(Mutex::new(Vec::new()));
        let launcher = Arc::new(
            ScriptedLauncher::new(vec![vec![
                notify("pre-dump"),
                notify("post-dump"),
                finished(CriuReqType::Dump, true),
            ]])
            .with_trace(trace.clone()),
        );
        let channel = RecordingChannel::new(trace.clone());

        donor(&fx, launcher.clone(), 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap();

        let trace = trace.lock().clone();
        let post_dump = trace.iter().position(|t| t == "engine:post-dump").unwrap();
        let first_transfer = trace.iter().position(|t| t.starts_with("transfer:")).unwrap();
        let relaunch = trace.iter().position(|t| t == "transfer:relaunch").unwrap();
        let success = trace.iter().position(|t| t == "engine:success").unwrap();
        assert!(post_dump < first_transfer);
        assert!(relaunch < success);
        assert_eq!(trace.last().map(String::as_str), Some("engine:success"));

        assert_eq!(launcher.log.lock().launches, vec![Some(4242)]);
        assert_eq!(launcher.log.lock().closed, 1);
        assert_eq!(fx.runtime.calls().last().map(String::as_str), Some("destroy:3"));
    }

    #[tokio::test]
    async fn test_image_order_and_chunking() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("post-dump"),
            finished(CriuReqType::Dump, true),
        ]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        donor(&fx, launcher, 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap();

        let calls = channel.calls();
        assert!(matches!(&calls[0], Call::ImageInfo(info) if info.rank == Rank(3) && info.generation == 0 && info.parent.is_none()));
        assert!(matches!(&calls[1], Call::FileInfo(info) if info.filename == STATE_FILE));
        assert_eq!(calls.last(), Some(&Call::Relaunch));

        let chunks: Vec<usize> = calls
            .iter()
            .skip_while(|c| !matches!(c, Call::FileInfo(info) if info.filename == "checkpoints/0/pages-1.img"))
            .skip(1)
            .take_while(|c| matches!(c, Call::FileData(_)))
            .map(|c| match c {
                Call::FileData(data) => data.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(chunks, vec![1024, 1024, 1024, 1024, 904]);
        assert_eq!(channel.file_bytes("checkpoints/0/pages-1.img").unwrap(), vec![7u8; 5000]);

        let open = calls
            .iter()
            .find_map(|c| match c {
                Call::FileInfo(info) if info.filename == "out.log" => Some(info.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(open.dir.as_deref(), fx.open_file.parent().and_then(|p| p.to_str()));
        assert_eq!(channel.file_bytes("out.log").unwrap(), b"hello from rank 3");

        assert!(calls
            .iter()
            .any(|c| matches!(c, Call::FileInfo(info) if info.filename == "checkpoints/0" && info.kind == FileKind::Dir)));
    }

    /// Records the thread each scan ran on.
    struct ThreadRecordingLister {
        files: Vec<PathBuf>,
        threads: Mutex<Vec<std::thread::ThreadId>>,
    }

    impl OpenFileLister for ThreadRecordingLister {
        fn open_files(
            &self,
            _root_pid: u32,
            _prefix: &Path,
        ) -> Result<Vec<PathBuf>, crate::domain::runtime::RuntimeError> {
            self.threads.lock().push(std::thread::current().id());
            Ok(self.files.clone())
        }
    }

    #[tokio::test]
    async fn test_open_file_scan_runs_off_the_runtime_thread() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("post-dump"),
            finished(CriuReqType::Dump, true),
        ]]));
        let lister = Arc::new(ThreadRecordingLister {
            files: vec![fx.open_file.clone()],
            threads: Mutex::new(Vec::new()),
        });
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        MigrationDonor::new(
            fx.runtime.clone(),
            Arc::new(ImageWritingLauncher {
                inner: launcher,
                checkpoints: fx.handle.checkpoints_dir(),
            }),
            lister.clone(),
            DonorConfig::default(),
        )
        .migrate(&fx.handle, &channel, false, &CancellationToken::new())
        .await
        .unwrap();

        let threads = lister.threads.lock().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
        assert_eq!(channel.file_bytes("out.log").unwrap(), b"hello from rank 3");
    }

    #[tokio::test]
    async fn test_engine_error_aborts_without_relaunch() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("pre-dump"),
            finished(CriuReqType::Dump, false),
        ]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        let err = donor(&fx, launcher.clone(), 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::EngineProtocolError(_)));
        assert!(!channel.calls().contains(&Call::Relaunch));
        assert!(!fx.runtime.calls().iter().any(|c| c.starts_with("destroy")));
        assert_eq!(launcher.log.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_sequence_skip_aborts() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("post-dump"),
            finished(CriuReqType::Dump, true),
        ]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new()))).skipping_at(2);

        let err = donor(&fx, launcher, 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MigrationError::SequenceMismatch {
                expected: SEQUENCE_BASE + 1,
                got: SEQUENCE_BASE + 2
            }
        );
        assert_eq!(channel.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_sequence_repeat_aborts() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("post-dump"),
            finished(CriuReqType::Dump, true),
        ]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new()))).repeating_at(3);

        let err = donor(&fx, launcher.clone(), 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MigrationError::SequenceMismatch {
                expected: SEQUENCE_BASE + 2,
                got: SEQUENCE_BASE + 1
            }
        );
        assert_eq!(channel.calls().len(), 3);
        assert!(!channel.calls().contains(&Call::Relaunch));
        assert!(!fx.runtime.calls().iter().any(|c| c.starts_with("destroy")));
        assert_eq!(launcher.log.lock().closed, 1);
    }

    #[tokio::test]
    async fn test_success_without_post_dump_is_rejected() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![finished(CriuReqType::Dump, true)]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        let err = donor(&fx, launcher, 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::EngineProtocolError(_)));
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pre_dump_ships_two_generations() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![
            vec![finished(CriuReqType::PreDump, true)],
            vec![notify("post-dump"), finished(CriuReqType::Dump, true)],
        ]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        donor(&fx, launcher.clone(), CHUNK_SIZE)
            .migrate(&fx.handle, &channel, true, &CancellationToken::new())
            .await
            .unwrap();

        let requests: Vec<_> = launcher
            .log
            .lock()
            .requests
            .iter()
            .filter(|r| r.r#type != CriuReqType::Notify as i32)
            .cloned()
            .collect();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].r#type, CriuReqType::PreDump as i32);
        assert_eq!(requests[1].r#type, CriuReqType::Dump as i32);
        assert_eq!(
            requests[1].opts.as_ref().and_then(|o| o.parent_img.clone()).as_deref(),
            Some("../0")
        );

        let images: Vec<(u32, Option<u32>)> = channel
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::ImageInfo(info) => Some((info.generation, info.parent)),
                _ => None,
            })
            .collect();
        assert_eq!(images, vec![(0, None), (1, Some(0))]);
        assert!(channel.calls().contains(&Call::LinkInfo(LinkInfo {
            filename: "checkpoints/1/parent".into(),
            target: "../0".into(),
        })));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_and_keeps_container() {
        let fx = fixture().await;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![notify("post-dump")]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));
        let token = CancellationToken::new();
        token.cancel();

        let err = donor(&fx, launcher, 1024)
            .migrate(&fx.handle, &channel, false, &token)
            .await
            .unwrap_err();
        assert_eq!(err, MigrationError::ShuttingDown);
        assert!(!fx.runtime.calls().iter().any(|c| c.starts_with("destroy")));
    }

    #[tokio::test]
    async fn test_destroy_failure_is_not_a_migration_failure() {
        let fx = fixture().await;
        *fx.runtime.fail_destroy.lock() = true;
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            notify("post-dump"),
            finished(CriuReqType::Dump, true),
        ]]));
        let channel = RecordingChannel::new(Arc::new(Mutex::new(Vec::new())));

        donor(&fx, launcher, 1024)
            .migrate(&fx.handle, &channel, false, &CancellationToken::new())
            .await
            .unwrap();
    }
}
