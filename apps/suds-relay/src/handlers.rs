use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use suds_core::{GatewayError, Session, SessionPatch};

use crate::gateway::{SessionGateway, SessionIdent};

pub type SharedGateway = Arc<SessionGateway>;

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    total_duration: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SessionEnvelope {
    pub session: Session,
}

#[derive(Debug, Deserialize)]
pub struct SessionSelector {
    pub code: Option<String>,
    pub id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GatewayError::InvalidCode | GatewayError::Rejected(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Expired => StatusCode::GONE,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CodeSpaceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Store(reason) => {
                error!("store failure: {reason}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

/// GET /health - Health check endpoint
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// POST /session - Create a new session
pub async fn create_session(
    State(gateway): State<SharedGateway>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<SessionEnvelope>), ApiError> {
    let request: CreateSessionRequest = serde_json::from_value(body)
        .map_err(|err| GatewayError::Rejected(err.to_string()))?;

    let session = gateway
        .create(&addr.ip().to_string(), request.total_duration)
        .await?;

    Ok((StatusCode::CREATED, Json(SessionEnvelope { session })))
}

/// GET /session?code=XXXX - Fetch a session by code
pub async fn get_session(
    State(gateway): State<SharedGateway>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(selector): Query<SessionSelector>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let code = selector.code.ok_or(GatewayError::InvalidCode)?;
    let session = gateway.fetch_by_code(&addr.ip().to_string(), &code).await?;
    Ok(Json(SessionEnvelope { session }))
}

/// PATCH /session?code=XXXX (or ?id=...) - Apply a whitelisted update
pub async fn patch_session(
    State(gateway): State<SharedGateway>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(selector): Query<SessionSelector>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    // Whitelist enforcement happens at parse time: unknown fields and
    // out-of-enum values fail here, before anything is read from the store.
    let patch: SessionPatch = serde_json::from_value(body)
        .map_err(|err| GatewayError::Rejected(err.to_string()))?;

    let ident = if let Some(id) = selector.id {
        SessionIdent::Id(id)
    } else if let Some(code) = selector.code {
        SessionIdent::Code(code)
    } else {
        return Err(GatewayError::InvalidCode.into());
    };

    let session = gateway.patch(&addr.ip().to_string(), ident, &patch).await?;
    Ok(Json(SessionEnvelope { session }))
}
