// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Ferry CLI

pub mod cluster;
pub mod config;
pub mod container;

pub use self::config::ConfigCommand;
pub use self::container::ContainerCommand;
