// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Nymph daemon: hosts containers and plays donor or recipient in migrations.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ferry_core::application::{
    CoordinatorGateway, DonorConfig, MigrationDonor, NymphService, RecipientConfig, RecipientManager,
    RecipientServices,
};
use ferry_core::domain::node_config::NodeConfigManifest;
use ferry_core::domain::runtime::{ContainerRuntime, NetworkManager, OpenFileLister};
use ferry_core::domain::transfer::RecipientConnector;
use ferry_core::domain::ControlError;
use ferry_core::infrastructure::criu::{CriuServiceLauncher, EngineLauncher};
use ferry_core::infrastructure::network::HostNetwork;
use ferry_core::infrastructure::procfs::ProcFs;
use ferry_core::infrastructure::repositories::InMemoryContainerRepository;
use ferry_core::infrastructure::runtime::ProcessRuntime;
use ferry_core::infrastructure::{CoordinatorClient, HttpRecipientConnector};
use ferry_core::presentation::nymph_api::{self, NymphState};

use super::{cancel_on, install_metrics_exporter, serve_until, shutdown_signal, PidFileGuard};

pub async fn start_nymph(config: NodeConfigManifest) -> Result<()> {
    let _guard = PidFileGuard::acquire("nymph")?;

    let nymph_config = &config.spec.nymph;
    let migration = &config.spec.migration;
    let location = nymph_config.location();
    info!(location = %location, "Ferry nymph starting (PID: {})", std::process::id());

    if let Some(port) = config.spec.observability.as_ref().and_then(|o| o.metrics_port) {
        install_metrics_exporter(port)?;
    }

    let shutdown_token = CancellationToken::new();
    let containers = InMemoryContainerRepository::new();
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(ProcessRuntime::new(&nymph_config.work_dir));
    let network: Arc<dyn NetworkManager> = Arc::new(HostNetwork);
    let open_files: Arc<dyn OpenFileLister> = Arc::new(ProcFs::new());
    let launcher: Arc<dyn EngineLauncher> = Arc::new(CriuServiceLauncher::new(
        &migration.criu_path,
        &migration.run_dir,
        migration.engine_log_level,
    ));

    let recipients = Arc::new(RecipientManager::new(
        RecipientServices {
            runtime: runtime.clone(),
            network,
            launcher: launcher.clone(),
            config: RecipientConfig {
                incoming_dir: nymph_config.work_dir.join("incoming"),
                open_file_prefix: migration.open_file_prefix.clone(),
                engine_log_level: migration.engine_log_level,
            },
        },
        containers.clone(),
    ));
    recipients
        .purge_incoming()
        .await
        .context("Failed to prepare incoming transfer directory")?;

    let donor = MigrationDonor::new(
        runtime.clone(),
        launcher,
        open_files,
        DonorConfig {
            chunk_size: migration.chunk_size,
            open_file_prefix: migration.open_file_prefix.clone(),
            engine_log_level: migration.engine_log_level,
        },
    );

    let coordinator: Arc<dyn CoordinatorGateway> = Arc::new(
        CoordinatorClient::new(config.spec.coordinator.base_url())
            .context("Failed to create coordinator client")?,
    );
    let connector: Arc<dyn RecipientConnector> = Arc::new(
        HttpRecipientConnector::new(nymph_config.port).context("Failed to create transfer client")?,
    );

    let service = Arc::new(NymphService::new(
        location,
        containers,
        runtime,
        donor,
        coordinator,
        connector,
        nymph_config.registration_backoff,
        shutdown_token.clone(),
    ));

    let app = nymph_api::router(
        Arc::new(NymphState {
            service: service.clone(),
            recipients,
            start_time: Instant::now(),
        }),
        migration.chunk_size,
    );

    let addr = format!("{}:{}", nymph_config.bind_address, nymph_config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Nymph listening on {}", addr);

    let server = tokio::spawn(serve_until(listener, app, shutdown_token.clone()));
    cancel_on(shutdown_signal(), shutdown_token.clone());

    // The API is already serving, so the coordinator can reach us once we appear in NymphSet.
    let registration = match service.register().await {
        Ok(slot) => {
            info!(slot, "Registered with coordinator at {}", config.spec.coordinator.base_url());
            Ok(true)
        }
        Err(ControlError::ShuttingDown) => Ok(false),
        Err(e) => {
            error!("Registration rejected by coordinator: {}", e);
            shutdown_token.cancel();
            Err(e)
        }
    };

    let served = server.await.context("HTTP server task panicked")?;
    info!("Nymph shutting down");

    let registered = registration.context("Failed to register nymph")?;
    if registered {
        if let Err(e) = service.unregister().await {
            warn!("Failed to unregister from coordinator: {}", e);
        }
    }

    served.context("HTTP server failed")
}
