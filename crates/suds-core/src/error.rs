use thiserror::Error;

use crate::patch::PatchError;

/// Failure taxonomy shared by the relay and its clients. Validation,
/// not-found, expired, and rate-limit outcomes are deliberately distinct
/// so callers can react differently to each.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid session code")]
    InvalidCode,
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("too many requests")]
    RateLimited,
    #[error("could not allocate a unique session code")]
    CodeSpaceExhausted,
    #[error("store unavailable: {0}")]
    Store(String),
}

impl From<PatchError> for GatewayError {
    fn from(err: PatchError) -> Self {
        GatewayError::Rejected(err.to_string())
    }
}

impl GatewayError {
    /// Transient failures are worth retrying; the rest are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Store(_) | GatewayError::RateLimited)
    }
}
