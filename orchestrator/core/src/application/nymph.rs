// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Nymph Service
//!
//! Per-node daemon logic: registers the node and its containers with the
//! coordinator, runs and deletes containers on request, delivers signals and
//! plays the donor role when the coordinator orders a migration. The
//! recipient role lives in [`crate::application::recipient`].
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates the node-local use cases

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::donor::MigrationDonor;
use crate::domain::errors::{ControlError, MigrationError};
use crate::domain::rank::{Location, Rank};
use crate::domain::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec, ContainerState, LaunchMode};
use crate::domain::transfer::RecipientConnector;
use crate::infrastructure::repositories::InMemoryContainerRepository;

/// Calls from a nymph to the coordinator.
#[async_trait]
pub trait CoordinatorGateway: Send + Sync {
    async fn register_nymph(&self, location: &Location) -> Result<usize, ControlError>;
    async fn unregister_nymph(&self, location: &Location) -> Result<(), ControlError>;
    async fn register_container(&self, rank: Rank, location: &Location) -> Result<(), ControlError>;
    async fn unregister_container(&self, rank: Rank, location: &Location) -> Result<(), ControlError>;
}

pub struct NymphService {
    location: Location,
    containers: InMemoryContainerRepository,
    runtime: Arc<dyn ContainerRuntime>,
    donor: MigrationDonor,
    coordinator: Arc<dyn CoordinatorGateway>,
    connector: Arc<dyn RecipientConnector>,
    registration_backoff: Duration,
    shutdown_token: CancellationToken,
}

impl NymphService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        location: Location,
        containers: InMemoryContainerRepository,
        runtime: Arc<dyn ContainerRuntime>,
        donor: MigrationDonor,
        coordinator: Arc<dyn CoordinatorGateway>,
        connector: Arc<dyn RecipientConnector>,
        registration_backoff: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            location,
            containers,
            runtime,
            donor,
            coordinator,
            connector,
            registration_backoff,
            shutdown_token,
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn containers(&self) -> &InMemoryContainerRepository {
        &self.containers
    }

    /// Registers this node, retrying on transport failures until it succeeds
    /// or shutdown is requested. Returns the assigned slot.
    pub async fn register(&self) -> Result<usize, ControlError> {
        loop {
            match self.coordinator.register_nymph(&self.location).await {
                Ok(slot) => {
                    info!(location = %self.location, slot, "Registered with coordinator");
                    return Ok(slot);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        location = %self.location,
                        backoff = ?self.registration_backoff,
                        "Coordinator unreachable, retrying registration: {}",
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.registration_backoff) => {}
                        _ = self.shutdown_token.cancelled() => return Err(ControlError::ShuttingDown),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn unregister(&self) -> Result<(), ControlError> {
        self.coordinator.unregister_nymph(&self.location).await
    }

    /// Creates and starts a container, then records it with the coordinator.
    pub async fn run_container(&self, spec: ContainerSpec) -> Result<ContainerHandle, MigrationError> {
        let rank = spec.rank;
        if self.containers.get(rank).is_some() {
            return Err(MigrationError::Runtime(format!("rank {} already runs here", rank)));
        }

        let mut handle = self.runtime.create(spec).await?;
        if let Err(e) = self.runtime.launch(&mut handle, LaunchMode::Run).await {
            if let Err(cleanup) = self.runtime.destroy(&handle).await {
                warn!(rank = %rank, "Failed to clean up container after launch error: {}", cleanup);
            }
            return Err(e.into());
        }
        self.containers.insert(handle.clone());
        info!(rank = %rank, pid = ?handle.pid, "Container started");

        self.register_container(rank).await.map_err(|e| match e {
            ControlError::Migration(inner) => inner,
            other => MigrationError::Remote(other.to_string()),
        })?;
        Ok(handle)
    }

    async fn register_container(&self, rank: Rank) -> Result<(), ControlError> {
        loop {
            match self.coordinator.register_container(rank, &self.location).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(rank = %rank, "Container registration failed, retrying: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.registration_backoff) => {}
                        _ = self.shutdown_token.cancelled() => return Err(ControlError::ShuttingDown),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn delete_container(&self, rank: Rank) -> Result<(), MigrationError> {
        let handle = self
            .containers
            .get(rank)
            .ok_or(MigrationError::ContainerNotFound(rank))?;
        self.runtime.destroy(&handle).await?;
        self.containers.remove(rank);
        info!(rank = %rank, "Container deleted");

        if let Err(e) = self.coordinator.unregister_container(rank, &self.location).await {
            warn!(rank = %rank, "Coordinator did not accept unregistration: {}", e);
        }
        Ok(())
    }

    pub async fn signal(&self, rank: Rank, signal: i32) -> Result<(), MigrationError> {
        let handle = self
            .containers
            .get(rank)
            .ok_or(MigrationError::ContainerNotFound(rank))?;
        self.runtime.signal(&handle, signal).await?;
        Ok(())
    }

    pub async fn status(&self, rank: Rank) -> Result<ContainerState, MigrationError> {
        let handle = self
            .containers
            .get(rank)
            .ok_or(MigrationError::ContainerNotFound(rank))?;
        Ok(self.runtime.status(&handle).await?)
    }

    /// Donor role: moves `rank` to the nymph at `dest`.
    pub async fn send(&self, rank: Rank, dest: &Location, pre_dump: bool) -> Result<(), MigrationError> {
        let handle = self
            .containers
            .get(rank)
            .ok_or(MigrationError::ContainerNotFound(rank))?;
        let session = Uuid::new_v4();
        info!(rank = %rank, src = %self.location, dst = %dest, session = %session, pre_dump, "Sending container");

        let channel = self.connector.connect(dest, session);
        self.donor
            .migrate(&handle, channel.as_ref(), pre_dump, &self.shutdown_token)
            .await?;
        self.containers.remove(rank);
        Ok(())
    }
}
