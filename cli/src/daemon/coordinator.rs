// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator daemon: control actor, rebalancing scheduler and HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ferry_core::application::{Control, NymphGateway, Scheduler};
use ferry_core::domain::node_config::NodeConfigManifest;
use ferry_core::domain::{LocationDb, NymphSet};
use ferry_core::infrastructure::{EventBus, NymphClient};
use ferry_core::presentation::coordinator_api::{self, CoordinatorState};

use super::{cancel_on, install_metrics_exporter, serve_until, shutdown_signal, spawn_event_logger, PidFileGuard};

/// Requests waiting behind a running migration before callers block.
const CONTROL_QUEUE_DEPTH: usize = 256;

pub async fn start_coordinator(config: NodeConfigManifest) -> Result<()> {
    let _guard = PidFileGuard::acquire("coordinator")?;
    info!("Ferry coordinator starting (PID: {})", std::process::id());

    if let Some(port) = config.spec.observability.as_ref().and_then(|o| o.metrics_port) {
        install_metrics_exporter(port)?;
    }

    let coordinator_config = &config.spec.coordinator;
    let shutdown_token = CancellationToken::new();
    let locations = Arc::new(LocationDb::new());
    let nymphs = Arc::new(NymphSet::new());
    let event_bus = EventBus::with_default_capacity();
    let event_logger = spawn_event_logger(&event_bus, shutdown_token.clone());

    let gateway: Arc<dyn NymphGateway> = Arc::new(
        NymphClient::new(config.spec.nymph.port).context("Failed to create nymph client")?,
    );
    let (control, control_task) = Control::new(
        locations.clone(),
        nymphs.clone(),
        gateway,
        event_bus.clone(),
        shutdown_token.clone(),
    )
    .spawn(CONTROL_QUEUE_DEPTH);

    let scheduler = Arc::new(Scheduler::new(
        locations.clone(),
        nymphs.clone(),
        control.clone(),
        coordinator_config.scheduler.clone(),
        shutdown_token.clone(),
    ));
    let scheduler_task = scheduler.start();

    let app = coordinator_api::router(Arc::new(CoordinatorState {
        control,
        locations,
        nymphs,
        start_time: Instant::now(),
    }));

    let addr = format!("{}:{}", coordinator_config.bind_address, coordinator_config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Coordinator listening on {}", addr);

    cancel_on(shutdown_signal(), shutdown_token.clone());
    let served = serve_until(listener, app, shutdown_token.clone())
        .await
        .context("HTTP server failed");

    info!("Coordinator shutting down");
    shutdown_token.cancel();

    for (name, task) in [
        ("scheduler", scheduler_task),
        ("control", control_task),
        ("event logger", event_logger),
    ] {
        if let Err(e) = task.await {
            warn!("{} task ended abnormally: {}", name, e);
        }
    }

    served
}
