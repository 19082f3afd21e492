// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Transfer Protocol Messages
//!
//! Calls exchanged between a donor nymph and a recipient nymph while a
//! checkpoint image and the container's open files are streamed across.
//! Every accepted call returns the next sequence number; the first accepted
//! call of a session returns [`SEQUENCE_BASE`].
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Wire vocabulary and channel seam of the transfer protocol

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::MigrationError;
use super::rank::{Location, Rank};

/// Sequence number returned by the first accepted call of a session.
pub const SEQUENCE_BASE: u64 = 4;

/// Size of a FileData chunk.
pub const CHUNK_SIZE: usize = 1 << 21;

/// Identity of the image about to be sent.
///
/// Sent once per checkpoint generation; a session carrying a pre-dump sends it
/// twice, the second time with `parent` pointing at the pre-dump generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub rank: Rank,
    pub id: String,
    pub args: Vec<String>,
    pub generation: u32,
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Dir,
}

/// Announces the next file. `filename` is relative to the session directory
/// unless `dir` supplies an absolute directory (used for open files).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub dir: Option<String>,
    pub size: u64,
    /// Permission bits (`st_mode & 0o7777`).
    pub mode: u32,
    pub mod_time_secs: i64,
    pub mod_time_nanos: u32,
    pub kind: FileKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    pub filename: String,
    pub target: String,
}

/// Parameters of one migration attempt, created by the control actor and
/// dropped when the protocol terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSession {
    pub rank: Rank,
    pub source: Location,
    pub dest: Location,
    pub pre_dump: bool,
}

/// Donor-side view of one recipient session.
#[async_trait]
pub trait RecipientChannel: Send + Sync {
    async fn image_info(&self, info: ImageInfo) -> Result<u64, MigrationError>;

    async fn link_info(&self, link: LinkInfo) -> Result<u64, MigrationError>;

    async fn file_info(&self, info: FileInfo) -> Result<u64, MigrationError>;

    async fn file_data(&self, data: FileData) -> Result<u64, MigrationError>;

    /// Returns only after the recipient's checkpoint engine reported success.
    async fn relaunch(&self) -> Result<u64, MigrationError>;
}

/// Opens recipient channels on remote nymphs.
pub trait RecipientConnector: Send + Sync {
    fn connect(&self, dest: &Location, session: Uuid) -> Box<dyn RecipientChannel>;
}
