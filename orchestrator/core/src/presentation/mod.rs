// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`ferry-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. No business logic lives here; all real work is delegated to
//! `crate::application`.
//!
//! | Module | Served by | Description |
//! |--------|-----------|-------------|
//! | [`coordinator_api`] | coordinator | Registration, migration and signal requests for the control actor |
//! | [`nymph_api`] | nymph | Container management, donor trigger and the transfer protocol |

pub mod coordinator_api;
pub mod error;
pub mod nymph_api;
