use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use suds_core::{
    generate_code, is_valid_code, normalize_code, now_millis, GatewayError, ServerMessage,
    Session, SessionPatch, DEFAULT_SESSION_SECONDS, MAX_SESSION_SECONDS,
};

use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::storage::SessionStore;
use crate::websocket::Subscribers;

const CODE_ATTEMPTS: usize = 5;

/// How a patch names its target row.
pub enum SessionIdent {
    Code(String),
    Id(Uuid),
}

/// The single writable entry point for session mutations. Validates,
/// rate-limits, writes through the store, and fans the updated row out
/// to subscribers.
pub struct SessionGateway {
    store: Arc<dyn SessionStore>,
    limiter: Arc<RateLimiter>,
    subscribers: Subscribers,
    ttl_seconds: u64,
}

impl SessionGateway {
    pub fn new(store: Arc<dyn SessionStore>, config: &Config) -> Self {
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_requests,
            Duration::from_secs(config.rate_limit_window_seconds),
        ));

        Self {
            store,
            limiter,
            subscribers: Subscribers::new(),
            ttl_seconds: config.session_ttl_seconds,
        }
    }

    pub fn subscribers(&self) -> &Subscribers {
        &self.subscribers
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Create a session with a fresh unique code. An invalid or missing
    /// duration falls back to the default; out-of-range values are clamped.
    pub async fn create(
        &self,
        client: &str,
        requested_total: Option<u32>,
    ) -> Result<Session, GatewayError> {
        self.check_limit(client)?;

        let total = requested_total
            .map(|v| v.clamp(1, MAX_SESSION_SECONDS))
            .unwrap_or(DEFAULT_SESSION_SECONDS);

        for attempt in 0..CODE_ATTEMPTS {
            let session = Session::new(generate_code(), total);
            match self.store.insert_new(&session).await {
                Ok(true) => {
                    debug!(code = %session.code, "session created");
                    return Ok(session);
                }
                Ok(false) => {
                    warn!(code = %session.code, attempt, "session code collision, retrying");
                }
                Err(err) => return Err(GatewayError::Store(err.to_string())),
            }
        }

        Err(GatewayError::CodeSpaceExhausted)
    }

    pub async fn fetch_by_code(
        &self,
        client: &str,
        raw_code: &str,
    ) -> Result<Session, GatewayError> {
        self.check_limit(client)?;
        self.resolve_by_code(raw_code).await
    }

    /// Lookup without touching the rate budget; subscriptions use this.
    pub(crate) async fn resolve_by_code(&self, raw_code: &str) -> Result<Session, GatewayError> {
        let code = normalize_code(raw_code);
        if !is_valid_code(&code) {
            return Err(GatewayError::InvalidCode);
        }

        let session = self
            .store
            .get_by_code(&code)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?
            .ok_or(GatewayError::NotFound)?;

        self.reject_expired(session)
    }

    /// Atomic whitelist update: the whole patch is validated before any
    /// field is applied, the update marker is bumped server-side, and the
    /// new row is published to subscribers.
    pub async fn patch(
        &self,
        client: &str,
        ident: SessionIdent,
        patch: &SessionPatch,
    ) -> Result<Session, GatewayError> {
        self.check_limit(client)?;
        patch.validate()?;

        let mut session = match ident {
            SessionIdent::Code(raw) => self.resolve_by_code(&raw).await?,
            SessionIdent::Id(id) => {
                let session = self
                    .store
                    .get_by_id(id)
                    .await
                    .map_err(|err| GatewayError::Store(err.to_string()))?
                    .ok_or(GatewayError::NotFound)?;
                self.reject_expired(session)?
            }
        };

        patch.apply_to(&mut session);
        session.touch(now_millis());

        self.store
            .update(&session)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?;

        self.subscribers.publish(
            &session.code,
            &ServerMessage::SessionUpdated {
                session: session.clone(),
            },
        );

        Ok(session)
    }

    fn check_limit(&self, client: &str) -> Result<(), GatewayError> {
        if self.limiter.allow(client) {
            Ok(())
        } else {
            Err(GatewayError::RateLimited)
        }
    }

    fn reject_expired(&self, session: Session) -> Result<Session, GatewayError> {
        if session.is_expired(now_seconds(), self.ttl_seconds) {
            return Err(GatewayError::Expired);
        }
        Ok(session)
    }
}

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
