// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::rank::Rank;
use crate::domain::runtime::ContainerHandle;

/// Containers hosted by this nymph, keyed by rank.
#[derive(Clone, Default)]
pub struct InMemoryContainerRepository {
    containers: Arc<RwLock<HashMap<Rank, ContainerHandle>>>,
}

impl InMemoryContainerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ContainerHandle) -> Option<ContainerHandle> {
        self.containers.write().insert(handle.rank, handle)
    }

    pub fn get(&self, rank: Rank) -> Option<ContainerHandle> {
        self.containers.read().get(&rank).cloned()
    }

    pub fn remove(&self, rank: Rank) -> Option<ContainerHandle> {
        self.containers.write().remove(&rank)
    }

    pub fn list(&self) -> Vec<ContainerHandle> {
        let mut all: Vec<_> = self.containers.read().values().cloned().collect();
        all.sort_by_key(|h| h.rank);
        all
    }
}
