// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rank::{Location, Rank};

/// Mutations applied by the control actor to LocationDB and NymphSet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryEvent {
    ContainerRegistered {
        rank: Rank,
        location: Location,
        registered_at: DateTime<Utc>,
    },
    ContainerUnregistered {
        rank: Rank,
        location: Location,
        unregistered_at: DateTime<Utc>,
    },
    NymphRegistered {
        location: Location,
        slot: usize,
        registered_at: DateTime<Utc>,
    },
    NymphUnregistered {
        location: Location,
        unregistered_at: DateTime<Utc>,
    },
}

/// Progress of migration sessions, as seen by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MigrationEvent {
    MigrationStarted {
        rank: Rank,
        source: Location,
        dest: Location,
        pre_dump: bool,
        started_at: DateTime<Utc>,
    },
    MigrationCompleted {
        rank: Rank,
        source: Location,
        dest: Location,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    MigrationFailed {
        rank: Rank,
        source: Location,
        dest: Location,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    SignalBroadcast {
        signal: i32,
        delivered: usize,
        failed: usize,
        sent_at: DateTime<Utc>,
    },
}
