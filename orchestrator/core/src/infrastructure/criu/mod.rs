// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Checkpoint/restore engine integration (CRIU RPC over a seqpacket socket).

pub mod driver;
pub mod service;
pub mod wire;

pub use driver::{CriuDriver, CriuEvent, CriuEventKind, DriverPhase, EngineConnection, EngineLauncher};
pub use service::CriuServiceLauncher;

#[cfg(test)]
pub(crate) use driver::testing;
