// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordinator HTTP API. Every mutating route is a request to the control actor.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::application::control::ControlHandle;
use crate::domain::location_db::LocationDb;
use crate::domain::nymph_set::NymphSet;
use crate::domain::rank::Location;
use crate::domain::dto::{
    BroadcastSignalRequest, ContainerLocationRequest, LocationEntry, MigrateRequest, NymphRequest,
    SlotResponse, StatusResponse,
};
use crate::presentation::error::ApiError;

pub struct CoordinatorState {
    pub control: ControlHandle,
    pub locations: Arc<LocationDb>,
    pub nymphs: Arc<NymphSet>,
    pub start_time: Instant,
}

pub fn router(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/containers/register", post(register_container_handler))
        .route("/api/containers/unregister", post(unregister_container_handler))
        .route("/api/migrate", post(migrate_handler))
        .route("/api/signal", post(signal_handler))
        .route("/api/nymphs/register", post(register_nymph_handler))
        .route("/api/nymphs/unregister", post(unregister_nymph_handler))
        .route("/api/nymphs", get(list_nymphs_handler))
        .route("/api/locations", get(list_locations_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<CoordinatorState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "ranks": state.locations.len(),
        "nymphs": state.nymphs.len(),
    }))
}

async fn register_container_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<ContainerLocationRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.control.register_container(req.rank, req.location).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn unregister_container_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<ContainerLocationRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.control.unregister_container(req.rank, req.location).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn migrate_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<MigrateRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.control.migrate(req.rank, req.dest, req.pre_dump).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn signal_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<BroadcastSignalRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.control.signal(req.signal).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn register_nymph_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<NymphRequest>,
) -> Result<Json<SlotResponse>, ApiError> {
    let slot = state.control.register_nymph(req.location).await?;
    Ok(Json(SlotResponse { slot }))
}

async fn unregister_nymph_handler(
    State(state): State<Arc<CoordinatorState>>,
    Json(req): Json<NymphRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.control.unregister_nymph(req.location).await?;
    Ok(Json(StatusResponse::ok()))
}

async fn list_nymphs_handler(State(state): State<Arc<CoordinatorState>>) -> Json<Vec<Location>> {
    Json(state.nymphs.get_nymphs())
}

async fn list_locations_handler(State(state): State<Arc<CoordinatorState>>) -> Json<Vec<LocationEntry>> {
    Json(
        state
            .locations
            .dump()
            .into_iter()
            .map(|(rank, location)| LocationEntry { rank, location })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::control::testing::{harness, Harness};
    use crate::domain::rank::Rank;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        router(Arc::new(CoordinatorState {
            control: h.handle.clone(),
            locations: h.locations.clone(),
            nymphs: h.nymphs.clone(),
            start_time: Instant::now(),
        }))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_list_locations() {
        let h = harness();
        let response = app(&h)
            .oneshot(post_json(
                "/api/containers/register",
                serde_json::json!({"rank": 3, "location": "node-a"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(&h)
            .oneshot(Request::builder().uri("/api/locations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            serde_json::json!([{"rank": 3, "location": "node-a"}])
        );
    }

    #[tokio::test]
    async fn test_unknown_rank_is_404_with_typed_body() {
        let h = harness();
        let response = app(&h)
            .oneshot(post_json(
                "/api/migrate",
                serde_json::json!({"rank": 9, "dest": "node-b"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["kind"], "unknown_rank");
        assert_eq!(body["message"], "rank 9 is not registered");
    }

    #[tokio::test]
    async fn test_nymph_slots_over_http() {
        let h = harness();
        for (name, slot) in [("a", 0), ("b", 1)] {
            let response = app(&h)
                .oneshot(post_json("/api/nymphs/register", serde_json::json!({"location": name})))
                .await
                .unwrap();
            assert_eq!(body_json(response).await["slot"], slot);
        }
        let response = app(&h)
            .oneshot(post_json("/api/nymphs/unregister", serde_json::json!({"location": "zz"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(h.locations.get(Rank(1)), None);
    }
}
