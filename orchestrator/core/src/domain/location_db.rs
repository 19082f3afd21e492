// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Location Registry
//!
//! Maps every registered rank to the node that currently hosts it. Readers may
//! call [`LocationDb::get`] and [`LocationDb::dump`] from anywhere; writes are
//! crate-private because only the control actor is allowed to mutate it.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Single source of truth for "where does rank R run"

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::errors::ControlError;
use super::rank::{Location, Rank};

#[derive(Debug, Default)]
pub struct LocationDb {
    entries: Mutex<HashMap<Rank, Location>>,
}

impl LocationDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rank: Rank) -> Option<Location> {
        self.entries.lock().get(&rank).cloned()
    }

    /// Point-in-time copy taken under the lock.
    pub fn dump(&self) -> BTreeMap<Rank, Location> {
        self.entries
            .lock()
            .iter()
            .map(|(rank, location)| (*rank, location.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn set(&self, rank: Rank, location: Location) {
        self.entries.lock().insert(rank, location);
    }

    /// Removes `rank` only if it is still recorded at `expected`.
    pub(crate) fn unset(&self, rank: Rank, expected: &Location) -> Result<(), ControlError> {
        let mut entries = self.entries.lock();
        match entries.get(&rank) {
            None => Err(ControlError::NotRegistered(format!("container {}", rank))),
            Some(recorded) if recorded != expected => Err(ControlError::StaleUnregister {
                rank,
                recorded: recorded.clone(),
                requested: expected.clone(),
            }),
            Some(_) => {
                entries.remove(&rank);
                Ok(())
            }
        }
    }
}
