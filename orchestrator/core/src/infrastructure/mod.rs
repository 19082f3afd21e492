// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod clients;
pub mod criu;
pub mod event_bus;
pub mod network;
pub mod procfs;
pub mod repositories;
pub mod runtime;

pub use clients::{CoordinatorClient, HttpRecipientConnector, NymphClient};
pub use event_bus::{EventBus, FerryEvent};
