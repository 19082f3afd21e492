// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP clients for the coordinator and nymph APIs.
//!
//! Typed errors travel as [`ErrorEnvelope`] bodies; a response that cannot be
//! decoded becomes a `Remote` error carrying the status line, and a request
//! that never got an answer becomes `TransportUnavailable`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::application::control::NymphGateway;
use crate::application::nymph::CoordinatorGateway;
use crate::domain::errors::{ControlError, ErrorEnvelope, MigrationError};
use crate::domain::rank::{Location, Rank};
use crate::domain::runtime::ContainerSpec;
use crate::domain::transfer::{
    FileData, FileInfo, ImageInfo, LinkInfo, MigrationSession, RecipientChannel, RecipientConnector,
};
use crate::domain::dto::{
    BroadcastSignalRequest, ContainerLocationRequest, ContainerSummary, LocationEntry, MigrateRequest,
    NymphRequest, RankSignalRequest, SeqResponse, SlotResponse, StatusResponse,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can be rebuilt from an HTTP exchange.
trait RemoteError: DeserializeOwned {
    fn transport(message: String) -> Self;
    fn remote(message: String) -> Self;
}

impl RemoteError for ControlError {
    fn transport(message: String) -> Self {
        ControlError::TransportUnavailable(message)
    }

    fn remote(message: String) -> Self {
        ControlError::Migration(MigrationError::Remote(message))
    }
}

impl RemoteError for MigrationError {
    fn transport(message: String) -> Self {
        MigrationError::TransportUnavailable(message)
    }

    fn remote(message: String) -> Self {
        MigrationError::Remote(message)
    }
}

fn http_client() -> anyhow::Result<Client> {
    use anyhow::Context;
    // No overall timeout: a migration request returns only after the container moved.
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

async fn read_json<T: DeserializeOwned, E: RemoteError>(response: Response) -> Result<T, E> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .bytes()
            .await
            .map_err(|e| E::transport(e.to_string()))?;
        return Err(match serde_json::from_slice::<ErrorEnvelope<E>>(&body) {
            Ok(envelope) => envelope.error,
            Err(_) => E::remote(format!("HTTP {}: {}", status, String::from_utf8_lossy(&body))),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| E::remote(format!("invalid response body: {}", e)))
}

/// Client for the coordinator API, used by nymphs and by the operator CLI.
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, ControlError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| ControlError::TransportUnavailable(e.to_string()))?;
        read_json(response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ControlError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| ControlError::TransportUnavailable(e.to_string()))?;
        read_json(response).await
    }

    pub async fn migrate(&self, rank: Rank, dest: Location, pre_dump: bool) -> Result<(), ControlError> {
        let _: StatusResponse = self
            .post("/api/migrate", &MigrateRequest { rank, dest, pre_dump })
            .await?;
        Ok(())
    }

    pub async fn signal(&self, signal: i32) -> Result<(), ControlError> {
        let _: StatusResponse = self.post("/api/signal", &BroadcastSignalRequest { signal }).await?;
        Ok(())
    }

    pub async fn locations(&self) -> Result<Vec<LocationEntry>, ControlError> {
        self.get("/api/locations").await
    }

    pub async fn nymphs(&self) -> Result<Vec<Location>, ControlError> {
        self.get("/api/nymphs").await
    }
}

#[async_trait]
impl CoordinatorGateway for CoordinatorClient {
    async fn register_nymph(&self, location: &Location) -> Result<usize, ControlError> {
        let reply: SlotResponse = self
            .post(
                "/api/nymphs/register",
                &NymphRequest {
                    location: location.clone(),
                },
            )
            .await?;
        Ok(reply.slot)
    }

    async fn unregister_nymph(&self, location: &Location) -> Result<(), ControlError> {
        let _: StatusResponse = self
            .post(
                "/api/nymphs/unregister",
                &NymphRequest {
                    location: location.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn register_container(&self, rank: Rank, location: &Location) -> Result<(), ControlError> {
        let _: StatusResponse = self
            .post(
                "/api/containers/register",
                &ContainerLocationRequest {
                    rank,
                    location: location.clone(),
                },
            )
            .await?;
        Ok(())
    }

    async fn unregister_container(&self, rank: Rank, location: &Location) -> Result<(), ControlError> {
        let _: StatusResponse = self
            .post(
                "/api/containers/unregister",
                &ContainerLocationRequest {
                    rank,
                    location: location.clone(),
                },
            )
            .await?;
        Ok(())
    }
}

/// Client for nymph APIs; the node is addressed per call by its location.
#[derive(Debug, Clone)]
pub struct NymphClient {
    client: Client,
    nymph_port: u16,
}

impl NymphClient {
    pub fn new(nymph_port: u16) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            nymph_port,
        })
    }

    fn url(&self, location: &Location, path: &str) -> String {
        format!("{}{}", location.base_url(self.nymph_port), path)
    }

    pub async fn run_container(&self, location: &Location, spec: &ContainerSpec) -> Result<ContainerSummary, MigrationError> {
        let response = self
            .client
            .post(self.url(location, "/api/containers"))
            .json(spec)
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        read_json(response).await
    }

    pub async fn delete_container(&self, location: &Location, rank: Rank) -> Result<(), MigrationError> {
        let response = self
            .client
            .delete(self.url(location, &format!("/api/containers/{}", rank)))
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        read_json::<StatusResponse, MigrationError>(response).await?;
        Ok(())
    }

    pub async fn list_containers(&self, location: &Location) -> Result<Vec<ContainerSummary>, MigrationError> {
        let response = self
            .client
            .get(self.url(location, "/api/containers"))
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        read_json(response).await
    }
}

#[async_trait]
impl NymphGateway for NymphClient {
    async fn send_migration(&self, session: &MigrationSession) -> Result<(), MigrationError> {
        let response = self
            .client
            .post(self.url(&session.source, "/api/migrate/send"))
            .json(&MigrateRequest {
                rank: session.rank,
                dest: session.dest.clone(),
                pre_dump: session.pre_dump,
            })
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        read_json::<StatusResponse, MigrationError>(response).await?;
        Ok(())
    }

    async fn signal(&self, location: &Location, rank: Rank, signal: i32) -> Result<(), MigrationError> {
        let response = self
            .client
            .post(self.url(location, "/api/signal"))
            .json(&RankSignalRequest { rank, signal })
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        read_json::<StatusResponse, MigrationError>(response).await?;
        Ok(())
    }
}

/// One transfer session against a recipient nymph. Bodies are bincode.
pub struct HttpRecipientChannel {
    client: Client,
    base_url: String,
    session: Uuid,
}

impl HttpRecipientChannel {
    async fn call(&self, operation: &str, body: Vec<u8>) -> Result<u64, MigrationError> {
        let response = self
            .client
            .post(format!(
                "{}/api/migration/{}/{}",
                self.base_url, self.session, operation
            ))
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| MigrationError::TransportUnavailable(e.to_string()))?;
        let reply = read_json::<SeqResponse, MigrationError>(response).await?;
        Ok(reply.seq)
    }

    async fn call_with<B: Serialize>(&self, operation: &str, body: &B) -> Result<u64, MigrationError> {
        let payload = bincode::serialize(body).map_err(|e| MigrationError::Io(e.to_string()))?;
        self.call(operation, payload).await
    }
}

#[async_trait]
impl RecipientChannel for HttpRecipientChannel {
    async fn image_info(&self, info: ImageInfo) -> Result<u64, MigrationError> {
        self.call_with("image-info", &info).await
    }

    async fn link_info(&self, link: LinkInfo) -> Result<u64, MigrationError> {
        self.call_with("link-info", &link).await
    }

    async fn file_info(&self, info: FileInfo) -> Result<u64, MigrationError> {
        self.call_with("file-info", &info).await
    }

    async fn file_data(&self, data: FileData) -> Result<u64, MigrationError> {
        self.call_with("file-data", &data).await
    }

    async fn relaunch(&self) -> Result<u64, MigrationError> {
        self.call("relaunch", Vec::new()).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpRecipientConnector {
    client: Client,
    nymph_port: u16,
}

impl HttpRecipientConnector {
    pub fn new(nymph_port: u16) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            nymph_port,
        })
    }
}

impl RecipientConnector for HttpRecipientConnector {
    fn connect(&self, dest: &Location, session: Uuid) -> Box<dyn RecipientChannel> {
        Box::new(HttpRecipientChannel {
            client: self.client.clone(),
            base_url: dest.base_url(self.nymph_port),
            session,
        })
    }
}
