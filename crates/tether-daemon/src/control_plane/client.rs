use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tether_types::{MachineId, TetherError, TetherResult};
use tracing::{debug, info};

use super::types::*;
use crate::connection::ControlPlaneLink;

/// Calls the workers make against the control plane.
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    async fn heartbeat(&self, report: &Heartbeat) -> TetherResult<()>;

    async fn fetch_commands(&self) -> TetherResult<Vec<RemoteCommand>>;

    async fn post_command_result(&self, command_id: &str, result: &CommandResult) -> TetherResult<()>;

    async fn upload_metrics(&self, report: &MetricsReport) -> TetherResult<()>;
}

pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    machine_id: MachineId,
    session_id: RwLock<Option<String>>,
    started_at: DateTime<Utc>,
}

impl HttpControlPlane {
    pub fn new(base_url: &str, machine_id: MachineId, timeout: Duration) -> TetherResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tether/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TetherError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            machine_id,
            session_id: RwLock::new(None),
            started_at: Utc::now(),
        })
    }

    pub fn machine_id(&self) -> &MachineId {
        &self.machine_id
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/machines/{}/{}", self.base_url, self.machine_id, path)
    }

    pub async fn open_session(&self) -> TetherResult<()> {
        let request = SessionRequest {
            machine_id: self.machine_id.clone(),
            hostname: sysinfo::System::host_name(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
        };
        let url = self.url("session");
        debug!("HTTP POST: {}", url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TetherError::Network(format!("HTTP POST failed: {}", e)))?;
        let response = check(response).await?;

        let session: SessionResponse = response.json().await.unwrap_or_default();
        if let Some(ref id) = session.session_id {
            info!("Control plane session {} opened", id);
        }
        *self.session_id.write() = session.session_id;
        Ok(())
    }

    pub async fn close_session(&self) -> TetherResult<()> {
        let url = self.url("session");
        debug!("HTTP DELETE: {}", url);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| TetherError::Network(format!("HTTP DELETE failed: {}", e)))?;
        check(response).await?;
        *self.session_id.write() = None;
        Ok(())
    }

    async fn post<T: serde::Serialize + ?Sized>(&self, path: &str, body: &T) -> TetherResult<Response> {
        let url = self.url(path);
        debug!("HTTP POST: {}", url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TetherError::Network(format!("HTTP POST failed: {}", e)))?;
        check(response).await
    }
}

/// Non-2xx responses become errors carrying the body text, so the
/// connection manager can classify them by message.
async fn check(response: Response) -> TetherResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
            TetherError::FatalRemote(message)
        }
        _ => TetherError::Connection(message),
    })
}

#[async_trait]
impl ControlPlaneApi for HttpControlPlane {
    async fn heartbeat(&self, report: &Heartbeat) -> TetherResult<()> {
        self.post("heartbeat", report).await.map(|_| ())
    }

    async fn fetch_commands(&self) -> TetherResult<Vec<RemoteCommand>> {
        let url = self.url("commands");
        debug!("HTTP GET: {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TetherError::Network(format!("HTTP GET failed: {}", e)))?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|e| TetherError::Network(format!("Failed to parse commands: {}", e)))
    }

    async fn post_command_result(&self, command_id: &str, result: &CommandResult) -> TetherResult<()> {
        self.post(&format!("commands/{}/result", command_id), result)
            .await
            .map(|_| ())
    }

    async fn upload_metrics(&self, report: &MetricsReport) -> TetherResult<()> {
        self.post("metrics", report).await.map(|_| ())
    }
}

#[async_trait]
impl ControlPlaneLink for HttpControlPlane {
    async fn connect(&self) -> TetherResult<()> {
        self.open_session().await
    }

    async fn disconnect(&self) -> TetherResult<()> {
        self.close_session().await
    }

    async fn on_connected(&self) -> TetherResult<()> {
        debug!("Control plane link up for machine {}", self.machine_id);
        Ok(())
    }
}
