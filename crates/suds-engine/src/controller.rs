use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use suds_core::{
    is_valid_code, normalize_code, plan_for_total, GatewayError, Phase, Session, SessionPatch, Step,
};

use crate::client::{GatewayClient, SessionRef};
use crate::engine::{Command, EngineError, Role, SyncEngine};
use crate::subscription::Subscription;

const CREATE_ATTEMPTS: u32 = 3;

/// Device-facing façade over one session: owns the gateway client, the
/// update subscription, and the running sync loop.
#[derive(Debug)]
pub struct SessionController {
    code: String,
    role: Role,
    engine: SyncEngine,
}

impl SessionController {
    /// Host a new session and run as driver. Lays out the proportional
    /// step plan for the granted total right away.
    pub async fn create(server: &str, total_seconds: Option<u32>) -> Result<Self, GatewayError> {
        let client = GatewayClient::new(server);
        let session = create_with_retry(&client, total_seconds).await?;
        info!(code = %session.code, "session created");

        let ws_url = client.ws_url(&session.code);
        let (subscription, snapshot) = Subscription::connect(&ws_url)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?;

        let code = snapshot.code.clone();
        let total = snapshot.total_duration_seconds;
        let engine = SyncEngine::spawn(Role::Driver, snapshot, client, subscription);

        let controller = Self {
            code,
            role: Role::Driver,
            engine,
        };
        controller
            .configure_steps(plan_for_total(total))
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?;
        Ok(controller)
    }

    /// Join an existing session by code and run as observer. Moves the
    /// session out of setup so the host knows a partner arrived.
    pub async fn join(server: &str, raw_code: &str) -> Result<Self, GatewayError> {
        let code = normalize_code(raw_code);
        if !is_valid_code(&code) {
            return Err(GatewayError::InvalidCode);
        }

        let client = GatewayClient::new(server);
        let session = client.fetch_session(&code).await?;
        if session.phase == Phase::Setup {
            client
                .patch_session(
                    &SessionRef::Id(session.id),
                    &SessionPatch::phase_change(Phase::Waiting),
                )
                .await?;
        }

        let ws_url = client.ws_url(&code);
        let (subscription, snapshot) = Subscription::connect(&ws_url)
            .await
            .map_err(|err| GatewayError::Store(err.to_string()))?;
        info!(code = %snapshot.code, "joined session");

        Ok(Self {
            code: snapshot.code.clone(),
            role: Role::Observer,
            engine: SyncEngine::spawn(Role::Observer, snapshot, client, subscription),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// A receiver that always holds the latest session snapshot.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.engine.watch()
    }

    pub async fn configure_steps(&self, steps: Vec<Step>) -> Result<(), EngineError> {
        self.engine.command(Command::ConfigureSteps(steps)).await
    }

    pub async fn start(&self) -> Result<(), EngineError> {
        self.engine.command(Command::Start).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.engine.command(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.engine.command(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.engine.command(Command::Stop).await
    }

    /// Tear down the subscription and the sync loop.
    pub async fn leave(self) {
        self.engine.shutdown().await;
    }
}

async fn create_with_retry(
    client: &GatewayClient,
    total_seconds: Option<u32>,
) -> Result<Session, GatewayError> {
    let mut delay = Duration::from_millis(500);
    for attempt in 1..=CREATE_ATTEMPTS {
        match client.create_session(total_seconds).await {
            Ok(session) => return Ok(session),
            Err(err) if err.is_transient() && attempt < CREATE_ATTEMPTS => {
                warn!("create attempt {attempt} failed, retrying: {err}");
                sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("loop returns on the last attempt")
}
