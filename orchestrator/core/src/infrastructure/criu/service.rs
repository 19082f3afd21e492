// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `criu service` process management
//!
//! Each driver gets a private engine process listening on a `SOCK_SEQPACKET`
//! unix socket. Dump-side engines are started inside the target's network
//! namespace so TCP connections can be checkpointed.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Real [`EngineLauncher`] and [`EngineConnection`] implementations

use async_trait::async_trait;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::driver::{EngineConnection, EngineLauncher};
use crate::domain::errors::MigrationError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const CONNECT_RETRY: Duration = Duration::from_millis(100);
const MAX_FRAME: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CriuServiceLauncher {
    criu_path: PathBuf,
    run_dir: PathBuf,
    verbosity: u32,
}

impl CriuServiceLauncher {
    pub fn new(criu_path: impl Into<PathBuf>, run_dir: impl Into<PathBuf>, verbosity: u32) -> Self {
        Self {
            criu_path: criu_path.into(),
            run_dir: run_dir.into(),
            verbosity,
        }
    }
}

#[async_trait]
impl EngineLauncher for CriuServiceLauncher {
    async fn launch(&self, target_pid: Option<u32>) -> Result<Box<dyn EngineConnection>, MigrationError> {
        let tag = match target_pid {
            Some(pid) => pid.to_string(),
            None => format!("restore-{}", Uuid::new_v4().simple()),
        };
        let socket_path = self.run_dir.join(format!("criu.service.{}", tag));
        let pidfile = self.run_dir.join(format!("criu.pidfile.{}", tag));
        let _ = std::fs::remove_file(&socket_path);

        let mut command = Command::new(&self.criu_path);
        command
            .arg("service")
            .arg("--address")
            .arg(&socket_path)
            .arg("--pidfile")
            .arg(&pidfile)
            .arg(format!("-v{}", self.verbosity))
            .env("PATH", "/sbin:/usr/sbin:/usr/local/sbin:/bin:/usr/bin")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // Kept open until the child has been spawned.
        let netns = match target_pid {
            Some(pid) => {
                let ns_path = format!("/proc/{}/ns/net", pid);
                let ns = std::fs::File::open(&ns_path).map_err(|e| {
                    MigrationError::EngineLaunchFailed(format!("cannot open {}: {}", ns_path, e))
                })?;
                let fd: RawFd = ns.as_raw_fd();
                // SAFETY: setns(2) is async-signal-safe and only touches the child.
                unsafe {
                    command.pre_exec(move || {
                        if libc::setns(fd, libc::CLONE_NEWNET) != 0 {
                            return Err(io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }
                Some(ns)
            }
            None => None,
        };

        let child = command.spawn().map_err(|e| {
            MigrationError::EngineLaunchFailed(format!(
                "cannot start {}: {}",
                self.criu_path.display(),
                e
            ))
        })?;
        drop(netns);

        let mut connection = SeqPacketConnection {
            fd: None,
            child: Some(child),
            socket_path: socket_path.clone(),
            pidfile,
        };

        match connect_with_retry(&socket_path).await {
            Ok(fd) => {
                info!(socket = %socket_path.display(), ?target_pid, "Checkpoint engine service ready");
                connection.fd = Some(Arc::new(fd));
                Ok(Box::new(connection))
            }
            Err(e) => {
                connection.close();
                Err(MigrationError::EngineLaunchFailed(format!(
                    "cannot connect to {}: {}",
                    socket_path.display(),
                    e
                )))
            }
        }
    }
}

async fn connect_with_retry(path: &Path) -> io::Result<OwnedFd> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        match connect_seqpacket(path) {
            Ok(fd) => return Ok(fd),
            Err(e) if tokio::time::Instant::now() >= deadline => return Err(e),
            Err(e) => {
                debug!(error = %e, "Checkpoint engine socket not ready, retrying");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

fn connect_seqpacket(path: &Path) -> io::Result<OwnedFd> {
    let bytes = path.as_os_str().as_bytes();

    // SAFETY: zeroed sockaddr_un is a valid value; the path is bounds-checked below.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long",
        ));
    }
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: plain socket(2) call; ownership moves into OwnedFd immediately.
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let len = (std::mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
    // SAFETY: addr outlives the call and len covers the initialized prefix.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_un as *const libc::sockaddr,
            len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

struct SeqPacketConnection {
    fd: Option<Arc<OwnedFd>>,
    child: Option<Child>,
    socket_path: PathBuf,
    pidfile: PathBuf,
}

impl SeqPacketConnection {
    fn socket(&self) -> Result<Arc<OwnedFd>, MigrationError> {
        self.fd
            .clone()
            .ok_or_else(|| MigrationError::EngineProtocolError("engine socket closed".to_string()))
    }
}

#[async_trait]
impl EngineConnection for SeqPacketConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), MigrationError> {
        let fd = self.socket()?;
        tokio::task::spawn_blocking(move || {
            // SAFETY: frame is a live buffer of frame.len() bytes.
            let sent = unsafe {
                libc::send(
                    fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    libc::MSG_NOSIGNAL,
                )
            };
            if sent < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        })
        .await
        .map_err(|e| MigrationError::EngineProtocolError(e.to_string()))?
        .map_err(|e| MigrationError::EngineProtocolError(format!("send to engine failed: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>, MigrationError> {
        let fd = self.socket()?;
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; MAX_FRAME];
            // SAFETY: buf is writable for MAX_FRAME bytes.
            let received = unsafe {
                libc::recv(
                    fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            match received {
                n if n < 0 => Err(io::Error::last_os_error()),
                0 => Ok(None),
                n => {
                    buf.truncate(n as usize);
                    Ok(Some(buf))
                }
            }
        })
        .await
        .map_err(|e| MigrationError::EngineProtocolError(e.to_string()))?
        .map_err(|e| MigrationError::EngineProtocolError(format!("receive from engine failed: {}", e)))
    }

    fn close(&mut self) {
        self.fd = None;

        if let Some(mut child) = self.child.take() {
            if let Some(pid) = child.id() {
                // SAFETY: signalling our own child by pid.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = child.wait().await {
                            warn!("Failed to reap checkpoint engine: {}", e);
                        }
                    });
                }
                Err(_) => {
                    let _ = child.start_kill();
                }
            }
        }

        for path in [&self.socket_path, &self.pidfile] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "Failed to remove engine file: {}", e);
                }
            }
        }
    }
}

impl Drop for SeqPacketConnection {
    fn drop(&mut self) {
        self.close();
    }
}
