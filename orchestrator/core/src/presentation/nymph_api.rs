// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Nymph HTTP API: container management, the donor trigger used by the
//! coordinator, and the recipient side of the transfer protocol.
//!
//! Transfer routes take bincode bodies and answer with a JSON [`SeqResponse`].

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::application::nymph::NymphService;
use crate::application::recipient::RecipientManager;
use crate::domain::errors::MigrationError;
use crate::domain::rank::Rank;
use crate::domain::runtime::{ContainerSpec, ContainerState};
use crate::domain::transfer::{FileData, FileInfo, ImageInfo, LinkInfo};
use crate::domain::dto::{ContainerSummary, MigrateRequest, RankSignalRequest, SeqResponse, StatusResponse};
use crate::presentation::error::ApiError;

/// Headroom above one FileData chunk for the bincode framing.
const BODY_SLACK: usize = 64 * 1024;

pub struct NymphState {
    pub service: Arc<NymphService>,
    pub recipients: Arc<RecipientManager>,
    pub start_time: Instant,
}

pub fn router(state: Arc<NymphState>, chunk_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/containers", post(run_container_handler).get(list_containers_handler))
        .route("/api/containers/{rank}", delete(delete_container_handler))
        .route("/api/signal", post(signal_handler))
        .route("/api/migrate/send", post(send_handler))
        .route("/api/migration/{session}/image-info", post(image_info_handler))
        .route("/api/migration/{session}/link-info", post(link_info_handler))
        .route("/api/migration/{session}/file-info", post(file_info_handler))
        .route("/api/migration/{session}/file-data", post(file_data_handler))
        .route("/api/migration/{session}/relaunch", post(relaunch_handler))
        .layer(DefaultBodyLimit::max(chunk_size + BODY_SLACK))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, MigrationError> {
    bincode::deserialize(body).map_err(|e| MigrationError::Io(format!("undecodable transfer body: {}", e)))
}

async fn health_handler(State(state): State<Arc<NymphState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "location": state.service.location(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "containers": state.service.containers().list().len(),
        "incoming_sessions": state.recipients.active_sessions(),
    }))
}

async fn run_container_handler(
    State(state): State<Arc<NymphState>>,
    Json(spec): Json<ContainerSpec>,
) -> Result<Json<ContainerSummary>, ApiError> {
    let handle = state.service.run_container(spec).await?;
    Ok(Json(ContainerSummary {
        rank: handle.rank,
        id: handle.id,
        pid: handle.pid,
        state: ContainerState::Running,
    }))
}

async fn list_containers_handler(State(state): State<Arc<NymphState>>) -> Json<Vec<ContainerSummary>> {
    let mut summaries = Vec::new();
    for handle in state.service.containers().list() {
        let status = state
            .service
            .status(handle.rank)
            .await
            .unwrap_or(ContainerState::Stopped);
        summaries.push(ContainerSummary {
            rank: handle.rank,
            id: handle.id,
            pid: handle.pid,
            state: status,
        });
    }
    Json(summaries)
}

async fn delete_container_handler(
    State(state): State<Arc<NymphState>>,
    Path(rank): Path<Rank>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.service.delete_container(rank).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn signal_handler(
    State(state): State<Arc<NymphState>>,
    Json(req): Json<RankSignalRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.service.signal(req.rank, req.signal).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn send_handler(
    State(state): State<Arc<NymphState>>,
    Json(req): Json<MigrateRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.service.send(req.rank, &req.dest, req.pre_dump).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn image_info_handler(
    State(state): State<Arc<NymphState>>,
    Path(session): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SeqResponse>, ApiError> {
    let info: ImageInfo = decode(&body)?;
    let seq = state.recipients.image_info(session, info).await?;
    Ok(Json(SeqResponse { seq }))
}

async fn link_info_handler(
    State(state): State<Arc<NymphState>>,
    Path(session): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SeqResponse>, ApiError> {
    let link: LinkInfo = decode(&body)?;
    let seq = state.recipients.link_info(session, link).await?;
    Ok(Json(SeqResponse { seq }))
}

async fn file_info_handler(
    State(state): State<Arc<NymphState>>,
    Path(session): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SeqResponse>, ApiError> {
    let info: FileInfo = decode(&body)?;
    let seq = state.recipients.file_info(session, info).await?;
    Ok(Json(SeqResponse { seq }))
}

async fn file_data_handler(
    State(state): State<Arc<NymphState>>,
    Path(session): Path<Uuid>,
    body: Bytes,
) -> Result<Json<SeqResponse>, ApiError> {
    let data: FileData = decode(&body)?;
    let seq = state.recipients.file_data(session, data).await?;
    Ok(Json(SeqResponse { seq }))
}

async fn relaunch_handler(
    State(state): State<Arc<NymphState>>,
    Path(session): Path<Uuid>,
) -> Result<Json<SeqResponse>, ApiError> {
    let seq = state.recipients.relaunch(session).await?;
    Ok(Json(SeqResponse { seq }))
}
