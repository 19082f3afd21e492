// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon mode implementation
//!
//! Handles:
//! - PID file management
//! - Signal-driven graceful shutdown
//! - Prometheus exporter and event logging shared by both daemons

use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ferry_core::infrastructure::event_bus::{EventBus, EventBusError};

pub mod coordinator;
pub mod nymph;

#[cfg(unix)]
const PID_DIR: &str = "/var/run/ferry";
#[cfg(unix)]
const PID_DIR_FALLBACK: &str = "/tmp";

pub fn get_pid_file_path(role: &str) -> PathBuf {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions.
        let uid = unsafe { libc::geteuid() };
        if uid == 0 {
            PathBuf::from(PID_DIR).join(format!("{}.pid", role))
        } else {
            PathBuf::from(PID_DIR_FALLBACK).join(format!("ferry-{}.pid", role))
        }
    }

    #[cfg(not(unix))]
    {
        std::env::temp_dir().join(format!("ferry-{}.pid", role))
    }
}

pub fn process_exists(_pid: u32) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: signal 0 only performs the permission and existence check.
        unsafe { libc::kill(_pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// Write PID file, refusing when another live daemon of the same role owns it
pub fn write_pid_file(role: &str, pid: u32) -> Result<()> {
    let pid_file = get_pid_file_path(role);

    if let Ok(content) = std::fs::read_to_string(&pid_file) {
        if let Ok(existing) = content.trim().parse::<u32>() {
            if existing != pid && process_exists(existing) {
                anyhow::bail!("ferry {} already running (PID: {})", role, existing);
            }
        }
        warn!("Replacing stale PID file: {:?}", pid_file);
    }

    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {:?}", parent))?;
    }
    std::fs::write(&pid_file, pid.to_string())
        .with_context(|| format!("Failed to write PID file: {:?}", pid_file))?;
    info!("Wrote PID file: {:?}", pid_file);
    Ok(())
}

/// Remove PID file
pub fn remove_pid_file(role: &str) -> Result<()> {
    let pid_file = get_pid_file_path(role);
    if pid_file.exists() {
        std::fs::remove_file(&pid_file)
            .with_context(|| format!("Failed to remove PID file: {:?}", pid_file))?;
        info!("Removed PID file: {:?}", pid_file);
    }
    Ok(())
}

/// Removes the role's PID file when the daemon returns, including on error.
pub struct PidFileGuard(&'static str);

impl PidFileGuard {
    pub fn acquire(role: &'static str) -> Result<Self> {
        write_pid_file(role, std::process::id())?;
        Ok(Self(role))
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file(self.0);
    }
}

/// Completes on Ctrl+C or SIGTERM. A handler that cannot be installed never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Cancels `token` once `signal` completes.
pub fn cancel_on<F>(signal: F, token: CancellationToken) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        signal.await;
        token.cancel();
    })
}

/// Serves `app` until `token` is cancelled, then drains open connections.
///
/// Handlers blocked on the control actor or a migration observe the same
/// token, so draining cannot outlive them.
pub async fn serve_until(listener: TcpListener, app: Router, token: CancellationToken) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

/// Serves `/metrics` on `port` for the lifetime of the process.
pub fn install_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to start Prometheus exporter on {}", addr))?;
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Mirrors every bus event into the log until shutdown.
pub fn spawn_event_logger(event_bus: &EventBus, shutdown_token: CancellationToken) -> JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => info!(event = %json, "Cluster event"),
                        Err(e) => warn!("Failed to serialize event: {}", e),
                    },
                    Err(EventBusError::Lagged(_)) => continue,
                    Err(_) => break,
                },
                _ = shutdown_token.cancelled() => break,
            }
        }
    })
}
