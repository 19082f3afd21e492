// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Checkpoint Engine Driver
//!
//! Wraps one conversation with a `criu service` instance. The driver walks a
//! fixed state machine:
//!
//! ```text
//! Idle -> Launched -> AwaitingEvent -> Notified -> (respond) -> AwaitingEvent ... -> Terminal
//! ```
//!
//! Events are produced lazily by [`CriuDriver::next_event`]; the engine does
//! not advance past a notification until [`CriuDriver::respond`] is called.
//! Once a terminal event has been returned the sequence is exhausted.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the engine lifecycle used by both migration roles

use async_trait::async_trait;
use prost::Message;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::wire::{CriuOpts, CriuReq, CriuReqType, CriuResp};
use crate::domain::errors::MigrationError;

/// Raw frame transport to a running engine instance.
#[async_trait]
pub trait EngineConnection: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), MigrationError>;

    /// `Ok(None)` when the engine closed its end.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, MigrationError>;

    /// Stops the engine and removes its socket and pidfile. Idempotent.
    fn close(&mut self);
}

/// Starts engine instances, optionally inside the network namespace of `target_pid`.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, target_pid: Option<u32>) -> Result<Box<dyn EngineConnection>, MigrationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    Launched,
    AwaitingEvent,
    Notified,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CriuEventKind {
    PreDump,
    PostDump,
    PreRestore,
    PostRestore,
    /// Any other notification script; acknowledged like the known ones.
    Other(String),
    Success,
    Error,
}

impl CriuEventKind {
    fn from_script(script: &str) -> Self {
        match script {
            "pre-dump" => CriuEventKind::PreDump,
            "post-dump" => CriuEventKind::PostDump,
            "pre-restore" => CriuEventKind::PreRestore,
            "post-restore" => CriuEventKind::PostRestore,
            other => CriuEventKind::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CriuEventKind::Success | CriuEventKind::Error)
    }
}

#[derive(Debug, Clone)]
pub struct CriuEvent {
    pub kind: CriuEventKind,
    pub response: CriuResp,
}

pub struct CriuDriver {
    images_dir: PathBuf,
    images_dir_handle: Option<std::fs::File>,
    target_pid: Option<u32>,
    connection: Option<Box<dyn EngineConnection>>,
    phase: DriverPhase,
    in_flight: Option<CriuReqType>,
    log_level: i32,
}

impl CriuDriver {
    pub fn new(images_dir: impl Into<PathBuf>, log_level: u32) -> Self {
        Self {
            images_dir: images_dir.into(),
            images_dir_handle: None,
            target_pid: None,
            connection: None,
            phase: DriverPhase::Idle,
            in_flight: None,
            log_level: log_level as i32,
        }
    }

    pub fn phase(&self) -> DriverPhase {
        self.phase
    }

    /// Opens the image directory and starts an engine. `target_pid` is the
    /// process to dump; restores pass `None` and run in the host namespace.
    pub async fn launch(
        &mut self,
        launcher: &dyn EngineLauncher,
        target_pid: Option<u32>,
    ) -> Result<(), MigrationError> {
        self.expect_phase(DriverPhase::Idle, "launch")?;

        let handle = std::fs::File::open(&self.images_dir).map_err(|e| {
            MigrationError::EngineLaunchFailed(format!(
                "cannot open image directory {}: {}",
                self.images_dir.display(),
                e
            ))
        })?;

        let connection = launcher.launch(target_pid).await?;
        self.images_dir_handle = Some(handle);
        self.connection = Some(connection);
        self.target_pid = target_pid;
        self.phase = DriverPhase::Launched;
        debug!(images_dir = %self.images_dir.display(), ?target_pid, "Checkpoint engine launched");
        Ok(())
    }

    /// Final dump. The process tree is stopped once the dump succeeds.
    pub async fn send_dump_request(&mut self, parent_img: Option<String>) -> Result<(), MigrationError> {
        let mut opts = self.base_opts("dump")?;
        opts.leave_running = Some(false);
        opts.parent_img = parent_img;
        self.send_request(CriuReqType::Dump, opts).await
    }

    /// Memory pre-dump; the process keeps running and dirty-page tracking is enabled.
    pub async fn send_pre_dump_request(&mut self) -> Result<(), MigrationError> {
        let mut opts = self.base_opts("pre-dump")?;
        opts.track_mem = Some(true);
        self.send_request(CriuReqType::PreDump, opts).await
    }

    pub async fn send_restore_request(&mut self, externals: Vec<String>) -> Result<(), MigrationError> {
        let mut opts = self.base_opts("restore")?;
        opts.pid = None;
        opts.external = externals;
        self.send_request(CriuReqType::Restore, opts).await
    }

    /// Next lifecycle event, or `None` once a terminal event has been returned.
    pub async fn next_event(&mut self) -> Result<Option<CriuEvent>, MigrationError> {
        match self.phase {
            DriverPhase::Terminal => return Ok(None),
            DriverPhase::AwaitingEvent => {}
            DriverPhase::Notified => {
                return Err(MigrationError::EngineProtocolError(
                    "previous notification was not acknowledged".to_string(),
                ))
            }
            DriverPhase::Idle | DriverPhase::Launched => {
                return Err(MigrationError::EngineProtocolError(
                    "no request in flight".to_string(),
                ))
            }
        }

        let frame = match self.connection_mut()?.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.phase = DriverPhase::Terminal;
                return Err(MigrationError::EngineProtocolError(
                    "engine closed the connection before completing".to_string(),
                ));
            }
            Err(e) => {
                self.phase = DriverPhase::Terminal;
                return Err(e);
            }
        };

        let response = match CriuResp::decode(frame.as_slice()) {
            Ok(response) => response,
            Err(e) => {
                self.phase = DriverPhase::Terminal;
                return Err(MigrationError::EngineProtocolError(format!(
                    "undecodable engine response: {}",
                    e
                )));
            }
        };

        let kind = self.classify(&response);
        self.phase = if kind.is_terminal() {
            DriverPhase::Terminal
        } else {
            DriverPhase::Notified
        };
        debug!(?kind, "Checkpoint engine event");
        Ok(Some(CriuEvent { kind, response }))
    }

    /// Acknowledges the current notification so the engine proceeds.
    pub async fn respond(&mut self) -> Result<(), MigrationError> {
        self.expect_phase(DriverPhase::Notified, "respond")?;
        let frame = CriuReq::notify_ack().encode_to_vec();
        self.connection_mut()?.send(frame).await?;
        self.phase = DriverPhase::AwaitingEvent;
        Ok(())
    }

    /// Stops the engine and releases the image directory. Safe in any phase.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.images_dir_handle = None;
        self.phase = DriverPhase::Terminal;
    }

    fn classify(&self, response: &CriuResp) -> CriuEventKind {
        match response.req_type() {
            Some(CriuReqType::Notify) if response.success => {
                CriuEventKind::from_script(response.notify_script().unwrap_or_default())
            }
            Some(kind) if Some(kind) == self.in_flight => {
                if response.success {
                    CriuEventKind::Success
                } else {
                    warn!(error = %response.error_summary(), "Checkpoint engine reported failure");
                    CriuEventKind::Error
                }
            }
            other => {
                warn!(
                    response_type = ?other,
                    expected = ?self.in_flight,
                    "Unexpected checkpoint engine response"
                );
                CriuEventKind::Error
            }
        }
    }

    fn base_opts(&self, action: &str) -> Result<CriuOpts, MigrationError> {
        self.expect_phase(DriverPhase::Launched, action)?;
        let fd = self
            .images_dir_handle
            .as_ref()
            .map(|f| f.as_raw_fd())
            .ok_or_else(|| MigrationError::EngineProtocolError("image directory not open".to_string()))?;

        let log_file = match self.target_pid {
            Some(pid) => format!("criu.log.{}", pid),
            None => "criu.log.restore".to_string(),
        };

        Ok(CriuOpts {
            images_dir_fd: fd,
            pid: self.target_pid.map(|p| p as i32),
            tcp_established: Some(true),
            shell_job: Some(true),
            file_locks: Some(true),
            log_level: Some(self.log_level),
            log_file: Some(log_file),
            notify_scripts: Some(true),
            ..Default::default()
        })
    }

    async fn send_request(&mut self, kind: CriuReqType, opts: CriuOpts) -> Result<(), MigrationError> {
        let request = CriuReq {
            r#type: kind as i32,
            opts: Some(opts),
            ..Default::default()
        };
        self.connection_mut()?.send(request.encode_to_vec()).await?;
        self.in_flight = Some(kind);
        self.phase = DriverPhase::AwaitingEvent;
        Ok(())
    }

    fn connection_mut(&mut self) -> Result<&mut Box<dyn EngineConnection>, MigrationError> {
        self.connection
            .as_mut()
            .ok_or_else(|| MigrationError::EngineProtocolError("engine is not running".to_string()))
    }

    fn expect_phase(&self, expected: DriverPhase, action: &str) -> Result<(), MigrationError> {
        if self.phase != expected {
            return Err(MigrationError::EngineProtocolError(format!(
                "cannot {} in phase {:?}",
                action, self.phase
            )));
        }
        Ok(())
    }
}

impl Drop for CriuDriver {
    fn drop(&mut self) {
        self.close();
    }
}
