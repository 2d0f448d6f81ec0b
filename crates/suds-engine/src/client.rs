use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use suds_core::{GatewayError, Session, SessionPatch};

/// How a device addresses its session row on the relay.
#[derive(Debug, Clone)]
pub enum SessionRef {
    Code(String),
    Id(Uuid),
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    total_duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SessionEnvelope {
    session: Session,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP client for the relay's session endpoints.
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(server: &str) -> Self {
        // Normalize localhost to IPv4 to avoid IPv6 (::1) preference
        let server = if server.contains("localhost") {
            server.replace("localhost", "127.0.0.1")
        } else {
            server.to_string()
        };

        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server
        } else {
            format!("http://{}", server)
        };

        // Conservative timeouts and no proxy so an unreachable relay
        // fails fast instead of hanging the countdown loop.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(4))
            .no_proxy()
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, base_url }
    }

    /// Ask the relay for a fresh session row.
    pub async fn create_session(
        &self,
        total_duration: Option<u32>,
    ) -> Result<Session, GatewayError> {
        let response = self
            .client
            .post(format!("{}/session", self.base_url))
            .json(&CreateSessionRequest { total_duration })
            .send()
            .await
            .map_err(transport)?;
        parse_session(response).await
    }

    /// Look up a session by its pairing code.
    pub async fn fetch_session(&self, code: &str) -> Result<Session, GatewayError> {
        let response = self
            .client
            .get(format!("{}/session?code={}", self.base_url, code))
            .send()
            .await
            .map_err(transport)?;
        parse_session(response).await
    }

    /// Push a partial update and get the stored row back.
    pub async fn patch_session(
        &self,
        target: &SessionRef,
        patch: &SessionPatch,
    ) -> Result<Session, GatewayError> {
        let url = match target {
            SessionRef::Code(code) => format!("{}/session?code={}", self.base_url, code),
            SessionRef::Id(id) => format!("{}/session?id={}", self.base_url, id),
        };
        let response = self
            .client
            .patch(url)
            .json(patch)
            .send()
            .await
            .map_err(transport)?;
        parse_session(response).await
    }

    /// WebSocket endpoint for a session code, derived from the HTTP base.
    pub fn ws_url(&self, code: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{}/ws/{}", ws_base, code)
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Store(err.to_string())
}

async fn parse_session(response: reqwest::Response) -> Result<Session, GatewayError> {
    let status = response.status();
    if status.is_success() {
        let envelope: SessionEnvelope = response.json().await.map_err(transport)?;
        return Ok(envelope.session);
    }

    let reason = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());

    Err(match status {
        StatusCode::BAD_REQUEST => GatewayError::Rejected(reason),
        StatusCode::NOT_FOUND => GatewayError::NotFound,
        StatusCode::GONE => GatewayError::Expired,
        StatusCode::TOO_MANY_REQUESTS => GatewayError::RateLimited,
        StatusCode::SERVICE_UNAVAILABLE => GatewayError::CodeSpaceExhausted,
        _ => GatewayError::Store(reason),
    })
}
