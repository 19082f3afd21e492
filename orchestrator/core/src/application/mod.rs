// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod control;
pub mod donor;
pub mod nymph;
pub mod recipient;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

// Re-export use cases for convenience
pub use control::{Control, ControlHandle, ControlReply, ControlRequest, NymphGateway};
pub use donor::{DonorConfig, MigrationClient, MigrationDonor};
pub use nymph::{CoordinatorGateway, NymphService};
pub use recipient::{Recipient, RecipientConfig, RecipientManager, RecipientServices};
pub use scheduler::Scheduler;
