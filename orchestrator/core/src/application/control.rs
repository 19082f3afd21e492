// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Control Actor
//!
//! The single writer of [`LocationDb`] and [`NymphSet`]. Requests from the
//! HTTP façade and the rebalancing scheduler are queued on one channel and
//! applied strictly one at a time, including migrations, which hold the
//! actor until the donor nymph reports the outcome.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Implements the coordinator's consistency core

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{ControlError, MigrationError};
use crate::domain::events::{MigrationEvent, RegistryEvent};
use crate::domain::location_db::LocationDb;
use crate::domain::nymph_set::NymphSet;
use crate::domain::rank::{Location, Rank};
use crate::domain::transfer::MigrationSession;
use crate::infrastructure::event_bus::EventBus;

/// Outbound calls from the coordinator to nymph daemons.
#[async_trait]
pub trait NymphGateway: Send + Sync {
    /// Asks the source nymph to migrate `session.rank` to `session.dest` and
    /// waits until the recipient has relaunched it.
    async fn send_migration(&self, session: &MigrationSession) -> Result<(), MigrationError>;

    async fn signal(&self, location: &Location, rank: Rank, signal: i32) -> Result<(), MigrationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    RegisterContainer { rank: Rank, location: Location },
    UnregisterContainer { rank: Rank, location: Location },
    Migrate { rank: Rank, dest: Location, pre_dump: bool },
    Signal { signal: i32 },
    RegisterNymph { location: Location },
    UnregisterNymph { location: Location },
}

impl ControlRequest {
    fn name(&self) -> &'static str {
        match self {
            ControlRequest::RegisterContainer { .. } => "register_container",
            ControlRequest::UnregisterContainer { .. } => "unregister_container",
            ControlRequest::Migrate { .. } => "migrate",
            ControlRequest::Signal { .. } => "signal",
            ControlRequest::RegisterNymph { .. } => "register_nymph",
            ControlRequest::UnregisterNymph { .. } => "unregister_nymph",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Done,
    Slot(usize),
}

type Envelope = (ControlRequest, oneshot::Sender<Result<ControlReply, ControlError>>);

/// Cloneable submission side of the actor.
#[derive(Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<Envelope>,
}

impl ControlHandle {
    pub async fn request(&self, request: ControlRequest) -> Result<ControlReply, ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send((request, reply_tx))
            .await
            .map_err(|_| ControlError::ShuttingDown)?;
        reply_rx.await.map_err(|_| ControlError::ShuttingDown)?
    }

    pub async fn register_container(&self, rank: Rank, location: Location) -> Result<(), ControlError> {
        self.request(ControlRequest::RegisterContainer { rank, location }).await.map(|_| ())
    }

    pub async fn unregister_container(&self, rank: Rank, location: Location) -> Result<(), ControlError> {
        self.request(ControlRequest::UnregisterContainer { rank, location }).await.map(|_| ())
    }

    pub async fn migrate(&self, rank: Rank, dest: Location, pre_dump: bool) -> Result<(), ControlError> {
        self.request(ControlRequest::Migrate { rank, dest, pre_dump }).await.map(|_| ())
    }

    pub async fn signal(&self, signal: i32) -> Result<(), ControlError> {
        self.request(ControlRequest::Signal { signal }).await.map(|_| ())
    }

    pub async fn register_nymph(&self, location: Location) -> Result<usize, ControlError> {
        match self.request(ControlRequest::RegisterNymph { location }).await? {
            ControlReply::Slot(slot) => Ok(slot),
            ControlReply::Done => Ok(0),
        }
    }

    pub async fn unregister_nymph(&self, location: Location) -> Result<(), ControlError> {
        self.request(ControlRequest::UnregisterNymph { location }).await.map(|_| ())
    }
}

pub struct Control {
    locations: Arc<LocationDb>,
    nymphs: Arc<NymphSet>,
    gateway: Arc<dyn NymphGateway>,
    event_bus: EventBus,
    shutdown_token: CancellationToken,
}

impl Control {
    pub fn new(
        locations: Arc<LocationDb>,
        nymphs: Arc<NymphSet>,
        gateway: Arc<dyn NymphGateway>,
        event_bus: EventBus,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            locations,
            nymphs,
            gateway,
            event_bus,
            shutdown_token,
        }
    }

    /// Starts the actor task. The task ends when the shutdown token fires or
    /// every [`ControlHandle`] has been dropped.
    pub fn spawn(self, queue_depth: usize) -> (ControlHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_depth);
        let task = tokio::spawn(self.run(receiver));
        (ControlHandle { sender }, task)
    }

    async fn run(self, mut receiver: mpsc::Receiver<Envelope>) {
        info!("Control actor started");
        loop {
            tokio::select! {
                next = receiver.recv() => {
                    let Some((request, reply)) = next else {
                        break;
                    };
                    let name = request.name();
                    let result = self.apply(request).await;
                    let outcome = if result.is_ok() { "ok" } else { "error" };
                    metrics::counter!("ferry_control_requests_total", "request" => name, "outcome" => outcome)
                        .increment(1);
                    if reply.send(result).is_err() {
                        debug!(request = name, "Control caller went away before the reply");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping control actor");
                    break;
                }
            }
        }
        info!("Control actor stopped");
    }

    async fn apply(&self, request: ControlRequest) -> Result<ControlReply, ControlError> {
        match request {
            ControlRequest::RegisterContainer { rank, location } => {
                info!(rank = %rank, location = %location, "Registering container");
                self.locations.set(rank, location.clone());
                self.event_bus.publish_registry_event(RegistryEvent::ContainerRegistered {
                    rank,
                    location,
                    registered_at: Utc::now(),
                });
                Ok(ControlReply::Done)
            }
            ControlRequest::UnregisterContainer { rank, location } => {
                self.locations.unset(rank, &location)?;
                info!(rank = %rank, location = %location, "Unregistered container");
                self.event_bus.publish_registry_event(RegistryEvent::ContainerUnregistered {
                    rank,
                    location,
                    unregistered_at: Utc::now(),
                });
                Ok(ControlReply::Done)
            }
            ControlRequest::Migrate { rank, dest, pre_dump } => {
                self.migrate(rank, dest, pre_dump).await.map(|_| ControlReply::Done)
            }
            ControlRequest::Signal { signal } => self.signal(signal).await.map(|_| ControlReply::Done),
            ControlRequest::RegisterNymph { location } => {
                let slot = self.nymphs.add(location.clone());
                info!(location = %location, slot, "Registered nymph");
                self.event_bus.publish_registry_event(RegistryEvent::NymphRegistered {
                    location,
                    slot,
                    registered_at: Utc::now(),
                });
                Ok(ControlReply::Slot(slot))
            }
            ControlRequest::UnregisterNymph { location } => {
                if !self.nymphs.del(&location) {
                    return Err(ControlError::NotRegistered(format!("nymph {}", location)));
                }
                info!(location = %location, "Unregistered nymph");
                self.event_bus.publish_registry_event(RegistryEvent::NymphUnregistered {
                    location,
                    unregistered_at: Utc::now(),
                });
                Ok(ControlReply::Done)
            }
        }
    }

    async fn migrate(&self, rank: Rank, dest: Location, pre_dump: bool) -> Result<(), ControlError> {
        let source = self.locations.get(rank).ok_or(ControlError::UnknownRank(rank))?;
        if source == dest {
            return Err(ControlError::NoOp { rank, location: dest });
        }

        let session = MigrationSession {
            rank,
            source: source.clone(),
            dest: dest.clone(),
            pre_dump,
        };
        info!(rank = %rank, src = %source, dst = %dest, pre_dump, "Starting migration");
        self.event_bus.publish_migration_event(MigrationEvent::MigrationStarted {
            rank,
            source: source.clone(),
            dest: dest.clone(),
            pre_dump,
            started_at: Utc::now(),
        });

        let started = Instant::now();
        let outcome = tokio::select! {
            result = self.gateway.send_migration(&session) => result,
            _ = self.shutdown_token.cancelled() => Err(MigrationError::ShuttingDown),
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                self.locations.set(rank, dest.clone());
                metrics::counter!("ferry_migrations_total", "outcome" => "success").increment(1);
                metrics::histogram!("ferry_migration_duration_seconds").record(elapsed.as_secs_f64());
                info!(rank = %rank, src = %source, dst = %dest, elapsed_ms = elapsed.as_millis() as u64, "Migration completed");
                self.event_bus.publish_migration_event(MigrationEvent::MigrationCompleted {
                    rank,
                    source,
                    dest,
                    duration_ms: elapsed.as_millis() as u64,
                    completed_at: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                metrics::counter!("ferry_migrations_total", "outcome" => "failure").increment(1);
                warn!(rank = %rank, src = %source, dst = %dest, "Migration failed: {}", e);
                self.event_bus.publish_migration_event(MigrationEvent::MigrationFailed {
                    rank,
                    source,
                    dest,
                    reason: e.to_string(),
                    failed_at: Utc::now(),
                });
                Err(ControlError::Migration(e))
            }
        }
    }

    /// Delivers `signal` to every registered rank; all deliveries are
    /// attempted and the first failure is reported.
    async fn signal(&self, signal: i32) -> Result<(), ControlError> {
        let snapshot = self.locations.dump();
        let mut first_error = None;
        let mut failed = 0;

        for (rank, location) in &snapshot {
            if let Err(e) = self.gateway.signal(location, *rank, signal).await {
                warn!(rank = %rank, location = %location, signal, "Signal delivery failed: {}", e);
                failed += 1;
                first_error.get_or_insert(ControlError::SignalFailed { rank: *rank, error: e });
            }
        }

        info!(signal, delivered = snapshot.len() - failed, failed, "Signal broadcast finished");
        self.event_bus.publish_migration_event(MigrationEvent::SignalBroadcast {
            signal,
            delivered: snapshot.len() - failed,
            failed,
            sent_at: Utc::now(),
        });

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Records gateway calls; migrations succeed unless the rank is listed in
    /// `failing` and may be held until `release` is notified.
    #[derive(Default)]
    pub struct RecordingGateway {
        pub migrations: Mutex<Vec<MigrationSession>>,
        pub signals: Mutex<Vec<(Location, Rank, i32)>>,
        pub failing: Mutex<Vec<Rank>>,
        pub hold: Mutex<Option<Arc<Notify>>>,
    }

    #[async_trait]
    impl NymphGateway for RecordingGateway {
        async fn send_migration(&self, session: &MigrationSession) -> Result<(), MigrationError> {
            self.migrations.lock().push(session.clone());
            let hold = self.hold.lock().clone();
            if let Some(hold) = hold {
                hold.notified().await;
            }
            if self.failing.lock().contains(&session.rank) {
                return Err(MigrationError::EngineProtocolError("dump failed".to_string()));
            }
            Ok(())
        }

        async fn signal(&self, location: &Location, rank: Rank, signal: i32) -> Result<(), MigrationError> {
            self.signals.lock().push((location.clone(), rank, signal));
            if self.failing.lock().contains(&rank) {
                return Err(MigrationError::TransportUnavailable(location.to_string()));
            }
            Ok(())
        }
    }

    pub struct Harness {
        pub handle: ControlHandle,
        pub locations: Arc<LocationDb>,
        pub nymphs: Arc<NymphSet>,
        pub gateway: Arc<RecordingGateway>,
        pub event_bus: EventBus,
        pub shutdown: CancellationToken,
        pub task: JoinHandle<()>,
    }

    pub fn harness() -> Harness {
        let locations = Arc::new(LocationDb::new());
        let nymphs = Arc::new(NymphSet::new());
        let gateway = Arc::new(RecordingGateway::default());
        let event_bus = EventBus::new(64);
        let shutdown = CancellationToken::new();
        let control = Control::new(
            locations.clone(),
            nymphs.clone(),
            gateway.clone(),
            event_bus.clone(),
            shutdown.clone(),
        );
        let (handle, task) = control.spawn(64);
        Harness {
            handle,
            locations,
            nymphs,
            gateway,
            event_bus,
            shutdown,
            task,
        }
    }
}
