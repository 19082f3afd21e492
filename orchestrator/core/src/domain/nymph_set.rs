// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Registered nymph daemons, the pool of migration destinations.

use parking_lot::Mutex;

use super::rank::Location;

/// Set of live nymphs. Each member occupies the lowest slot that was free when
/// it registered; slots are reused after deregistration.
#[derive(Debug, Default)]
pub struct NymphSet {
    slots: Mutex<Vec<Option<Location>>>,
}

impl NymphSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of registered nymphs in slot order.
    pub fn get_nymphs(&self) -> Vec<Location> {
        self.slots.lock().iter().flatten().cloned().collect()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.slots.lock().iter().flatten().any(|l| l == location)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `location` and returns its slot id. Re-adding a member returns
    /// the slot it already holds.
    pub(crate) fn add(&self, location: Location) -> usize {
        let mut slots = self.slots.lock();
        if let Some(existing) = slots.iter().position(|s| s.as_ref() == Some(&location)) {
            return existing;
        }
        match slots.iter().position(Option::is_none) {
            Some(free) => {
                slots[free] = Some(location);
                free
            }
            None => {
                slots.push(Some(location));
                slots.len() - 1
            }
        }
    }

    /// Returns whether `location` was registered.
    pub(crate) fn del(&self, location: &Location) -> bool {
        let mut slots = self.slots.lock();
        match slots.iter().position(|s| s.as_ref() == Some(location)) {
            Some(index) => {
                slots[index] = None;
                while matches!(slots.last(), Some(None)) {
                    slots.pop();
                }
                true
            }
            None => false,
        }
    }
}
