// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy for control requests and migration sessions
//!
//! Both enums are serializable with a stable `kind` tag so that an error raised
//! on a nymph survives the HTTP hop to the coordinator and from there to the
//! operator CLI without losing its meaning.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Typed failures shared by every component

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rank::{Location, Rank};

/// Failure of a single migration session, raised on either side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MigrationError {
    #[error("checkpoint engine failed to start: {0}")]
    EngineLaunchFailed(String),

    #[error("checkpoint engine protocol error: {0}")]
    EngineProtocolError(String),

    #[error("unexpected sequence number: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },

    #[error("found unfinished file {0}")]
    UnfinishedFile(String),

    #[error("unexpected buffer size: {received} bytes received, {remaining} remaining")]
    UnexpectedSize { remaining: u64, received: u64 },

    #[error("received image does not match announced container: {0}")]
    IdentityMismatch(String),

    #[error("rejected path {0}")]
    PathRejected(String),

    #[error("unknown transfer session {0}")]
    UnknownSession(String),

    #[error("rank {0} is not hosted on this node")]
    ContainerNotFound(Rank),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("shutting down")]
    ShuttingDown,
}

impl MigrationError {
    /// Whether the failure came from infrastructure rather than from a bad
    /// request. Every engine, transfer or peer failure aborts only the current
    /// session, so a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MigrationError::ContainerNotFound(_))
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io(err.to_string())
    }
}

impl From<super::runtime::RuntimeError> for MigrationError {
    fn from(err: super::runtime::RuntimeError) -> Self {
        MigrationError::Runtime(err.to_string())
    }
}

/// Failure of a request processed by the control actor.
///
/// None of these leave LocationDB or NymphSet partially updated.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ControlError {
    #[error("rank {0} is not registered")]
    UnknownRank(Rank),

    #[error("rank {rank} already runs on {location}")]
    NoOp { rank: Rank, location: Location },

    #[error("request for deleting {rank}@{recorded} came from {requested}")]
    StaleUnregister {
        rank: Rank,
        recorded: Location,
        requested: Location,
    },

    #[error("{0} was not registered")]
    NotRegistered(String),

    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    #[error("signal delivery to rank {rank} failed: {error}")]
    SignalFailed { rank: Rank, error: MigrationError },

    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("control actor is shutting down")]
    ShuttingDown,
}

impl ControlError {
    /// Operator errors (`UnknownRank`, `NoOp`, ...) are not worth retrying;
    /// infrastructure failures underneath a migration or signal may be.
    pub fn is_retryable(&self) -> bool {
        match self {
            ControlError::Migration(err) => err.is_retryable(),
            ControlError::SignalFailed { error, .. } => error.is_retryable(),
            ControlError::TransportUnavailable(_) | ControlError::ShuttingDown => true,
            _ => false,
        }
    }
}

/// JSON body of a failed HTTP call: the typed error plus its rendered message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope<E> {
    pub error: E,
    pub message: String,
}
