// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain model: registries, identity types, errors and protocol vocabulary.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types every other layer builds on

pub mod dto;
pub mod errors;
pub mod events;
pub mod location_db;
pub mod node_config;
pub mod nymph_set;
pub mod path_sanitizer;
pub mod rank;
pub mod runtime;
pub mod transfer;

pub use errors::{ControlError, MigrationError};
pub use location_db::LocationDb;
pub use nymph_set::NymphSet;
pub use rank::{Location, Rank};
