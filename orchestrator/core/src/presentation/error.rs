// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP rendering of control and migration errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::debug;

use crate::domain::errors::{ControlError, ErrorEnvelope, MigrationError};

/// Error returned by every handler; the body is an [`ErrorEnvelope`].
#[derive(Debug)]
pub enum ApiError {
    Control(ControlError),
    Migration(MigrationError),
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError::Control(err)
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        ApiError::Migration(err)
    }
}

pub fn migration_status(err: &MigrationError) -> StatusCode {
    match err {
        MigrationError::UnknownSession(_) | MigrationError::ContainerNotFound(_) => StatusCode::NOT_FOUND,
        MigrationError::UnfinishedFile(_)
        | MigrationError::UnexpectedSize { .. }
        | MigrationError::SequenceMismatch { .. } => StatusCode::CONFLICT,
        MigrationError::PathRejected(_) | MigrationError::IdentityMismatch(_) => StatusCode::BAD_REQUEST,
        MigrationError::TransportUnavailable(_) | MigrationError::ShuttingDown => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        MigrationError::Remote(_) => StatusCode::BAD_GATEWAY,
        MigrationError::EngineLaunchFailed(_)
        | MigrationError::EngineProtocolError(_)
        | MigrationError::Runtime(_)
        | MigrationError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn control_status(err: &ControlError) -> StatusCode {
    match err {
        ControlError::UnknownRank(_) | ControlError::NotRegistered(_) => StatusCode::NOT_FOUND,
        ControlError::NoOp { .. } | ControlError::StaleUnregister { .. } => StatusCode::CONFLICT,
        ControlError::Migration(inner) => migration_status(inner),
        ControlError::SignalFailed { .. } => StatusCode::BAD_GATEWAY,
        ControlError::TransportUnavailable(_) | ControlError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Control(err) => {
                debug!("Control request failed: {}", err);
                let status = control_status(&err);
                let message = err.to_string();
                (status, Json(ErrorEnvelope { error: err, message })).into_response()
            }
            ApiError::Migration(err) => {
                debug!("Migration request failed: {}", err);
                let status = migration_status(&err);
                let message = err.to_string();
                (status, Json(ErrorEnvelope { error: err, message })).into_response()
            }
        }
    }
}
