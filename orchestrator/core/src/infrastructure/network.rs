// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use tracing::debug;

use crate::domain::rank::Rank;
use crate::domain::runtime::{ContainerHandle, NetworkEndpoint, NetworkManager, RuntimeError};

/// Containers share the host network namespace; nothing to provision.
#[derive(Debug, Default, Clone)]
pub struct HostNetwork;

#[async_trait]
impl NetworkManager for HostNetwork {
    async fn declare_external(&self, rank: Rank) -> Result<Option<NetworkEndpoint>, RuntimeError> {
        debug!(rank = %rank, "Host network: no external endpoint");
        Ok(None)
    }

    async fn post_restore(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        debug!(rank = %handle.rank, "Host network: nothing to rewire after restore");
        Ok(())
    }
}
