use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use suds_core::{Phase, ServerMessage, Session, SessionPatch};

use crate::client::{GatewayClient, SessionRef};
use crate::subscription::Subscription;

/// How often the driver checkpoints `time_remaining` to the relay while
/// running. Phase and step changes are pushed immediately regardless.
pub const CHECKPOINT_SECONDS: u32 = 5;

/// Which side of the pairing this engine instance plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the countdown, advances steps, writes checkpoints.
    Driver,
    /// Mirrors the driver, estimates the countdown between events.
    Observer,
}

/// Control input from the device owner.
#[derive(Debug, Clone)]
pub enum Command {
    ConfigureSteps(Vec<suds_core::Step>),
    Start,
    Pause,
    Resume,
    Stop,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::ConfigureSteps(_) => "configure",
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no active steps to run")]
    NoActiveSteps,
    #[error("invalid steps: {0}")]
    InvalidSteps(String),
    #[error("{command} is not allowed while {phase}")]
    InvalidTransition {
        command: &'static str,
        phase: Phase,
    },
    #[error("engine has stopped")]
    Stopped,
    #[error("sync failed: {0}")]
    Sync(String),
}

/// The reconciliation core. Two event sources feed it, the one-second
/// tick and the remote change feed, plus commands from the device owner.
/// It never touches a clock or a socket itself, so every transition is
/// testable in isolation.
#[derive(Debug)]
pub struct EngineState {
    role: Role,
    session: Session,
    ticks_since_checkpoint: u32,
    advanced_from: Option<u32>,
}

impl EngineState {
    pub fn new(role: Role, session: Session) -> Self {
        Self {
            role,
            session,
            ticks_since_checkpoint: 0,
            advanced_from: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// One second elapsed. A driver may return a patch to push; an
    /// observer only refines its local estimate and never writes.
    pub fn on_tick(&mut self) -> Option<SessionPatch> {
        if self.session.phase != Phase::Running {
            return None;
        }

        if self.role == Role::Observer {
            // Visual estimate only; the next checkpoint corrects drift.
            self.session.time_remaining_seconds =
                self.session.time_remaining_seconds.saturating_sub(1);
            return None;
        }

        if self.session.time_remaining_seconds <= 1 {
            return self.cross_zero();
        }

        self.session.time_remaining_seconds -= 1;
        self.ticks_since_checkpoint += 1;
        if self.ticks_since_checkpoint >= CHECKPOINT_SECONDS {
            self.ticks_since_checkpoint = 0;
            return Some(SessionPatch::checkpoint(
                self.session.time_remaining_seconds,
            ));
        }
        None
    }

    /// The countdown hit zero. Advances to the next active step or
    /// finishes, as one atomic decision. Idempotent per step index, so a
    /// duplicate crossing at the same boundary is a no-op.
    fn cross_zero(&mut self) -> Option<SessionPatch> {
        let index = self.session.active_step_index;
        if self.advanced_from == Some(index) {
            return None;
        }
        self.advanced_from = Some(index);
        self.ticks_since_checkpoint = 0;

        let next_duration = self
            .session
            .nth_active(index + 1)
            .map(|step| step.duration_seconds);

        match next_duration {
            Some(duration) => {
                self.session.active_step_index = index + 1;
                self.session.time_remaining_seconds = duration;
                self.advanced_from = None;
                Some(SessionPatch::progression(Phase::Running, index + 1, duration))
            }
            None => {
                self.session.phase = Phase::Finished;
                self.session.time_remaining_seconds = 0;
                Some(SessionPatch::progression(Phase::Finished, index, 0))
            }
        }
    }

    /// Apply a remote change event. Returns true when the local view
    /// changed and a fresh snapshot should be published.
    pub fn on_remote(&mut self, remote: Session) -> bool {
        if remote.last_update_ms <= self.session.last_update_ms {
            // Stale or duplicate delivery.
            return false;
        }

        if self.role == Role::Observer {
            self.session = remote;
            return true;
        }

        if self.same_shape(&remote) {
            // Echo of our own checkpoint. Keep the local countdown, but
            // adopt the marker so later staleness checks line up.
            self.session.last_update_ms = remote.last_update_ms;
            return false;
        }

        // An observer control took effect. Adopt it and re-anchor.
        self.session = remote;
        self.ticks_since_checkpoint = 0;
        self.advanced_from = None;
        true
    }

    fn same_shape(&self, remote: &Session) -> bool {
        self.session.phase == remote.phase
            && self.session.active_step_index == remote.active_step_index
            && self.session.total_duration_seconds == remote.total_duration_seconds
            && self.session.steps == remote.steps
    }

    /// Fold in the row returned by a successful push without disturbing
    /// the local countdown.
    pub fn absorb_ack(&mut self, row: &Session) {
        if row.last_update_ms > self.session.last_update_ms {
            self.session.last_update_ms = row.last_update_ms;
        }
    }

    /// Turn a control command into a patch to push. The driver applies
    /// it locally right away; the observer waits for the relay's echo.
    pub fn on_command(&mut self, command: &Command) -> Result<SessionPatch, EngineError> {
        let phase = self.session.phase;
        let patch = match command {
            Command::ConfigureSteps(steps) => {
                if !matches!(phase, Phase::Setup | Phase::Waiting | Phase::Ready) {
                    return Err(self.invalid(command));
                }
                let total: u32 = steps
                    .iter()
                    .filter(|s| s.active)
                    .map(|s| s.duration_seconds)
                    .sum();
                let mut patch = SessionPatch::configuration(steps.clone(), total, total);
                // Still in setup means no partner yet; readiness waits
                // until the session has been joined.
                if phase != Phase::Setup {
                    patch.phase = Some(Phase::Ready);
                }
                patch.validate().map_err(|err| EngineError::InvalidSteps(err.to_string()))?;
                patch
            }
            Command::Start => {
                if !matches!(phase, Phase::Waiting | Phase::Ready) {
                    return Err(self.invalid(command));
                }
                let first = self
                    .session
                    .nth_active(0)
                    .map(|step| step.duration_seconds)
                    .ok_or(EngineError::NoActiveSteps)?;
                let mut patch = SessionPatch::progression(Phase::Running, 0, first);
                patch.total_duration = Some(self.session.active_total_duration());
                patch
            }
            Command::Pause => {
                if phase != Phase::Running {
                    return Err(self.invalid(command));
                }
                SessionPatch::phase_change(Phase::Paused)
            }
            Command::Resume => {
                if phase != Phase::Paused {
                    return Err(self.invalid(command));
                }
                SessionPatch::phase_change(Phase::Running)
            }
            Command::Stop => {
                if !phase.is_live() && phase != Phase::Finished {
                    return Err(self.invalid(command));
                }
                SessionPatch::progression(Phase::Waiting, 0, 0)
            }
        };

        if self.role == Role::Driver {
            patch.apply_to(&mut self.session);
            self.ticks_since_checkpoint = 0;
            self.advanced_from = None;
        }
        Ok(patch)
    }

    fn invalid(&self, command: &Command) -> EngineError {
        EngineError::InvalidTransition {
            command: command.name(),
            phase: self.session.phase,
        }
    }
}

struct EngineRequest {
    command: Command,
    reply: oneshot::Sender<Result<(), EngineError>>,
}

/// Handle to a running sync loop. Snapshots of the session flow out
/// through a watch channel; commands flow in through `command`.
#[derive(Debug)]
pub struct SyncEngine {
    requests: mpsc::Sender<EngineRequest>,
    snapshots: watch::Receiver<Session>,
    task: tokio::task::JoinHandle<()>,
}

impl SyncEngine {
    pub fn spawn(
        role: Role,
        session: Session,
        client: GatewayClient,
        subscription: Subscription,
    ) -> Self {
        let target = SessionRef::Id(session.id);
        let state = EngineState::new(role, session);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.session().clone());
        let (request_tx, request_rx) = mpsc::channel(8);

        let task = tokio::spawn(run(
            state,
            client,
            target,
            subscription,
            snapshot_tx,
            request_rx,
        ));

        Self {
            requests: request_tx,
            snapshots: snapshot_rx,
            task,
        }
    }

    /// A receiver that always holds the latest session snapshot.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.snapshots.clone()
    }

    pub async fn command(&self, command: Command) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest { command, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Stop the loop and wait for it to wind down.
    pub async fn shutdown(self) {
        drop(self.requests);
        let _ = self.task.await;
    }
}

async fn run(
    mut state: EngineState,
    client: GatewayClient,
    target: SessionRef,
    mut subscription: Subscription,
    snapshots: watch::Sender<Session>,
    mut requests: mpsc::Receiver<EngineRequest>,
) {
    let mut pending: Option<SessionPatch> = None;
    let mut feed_open = true;
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick_step(&mut state, &client, &target, &mut pending, &snapshots).await;
            }
            msg = subscription.recv(), if feed_open => {
                match msg {
                    Some(ServerMessage::SessionUpdated { session }) => {
                        if state.on_remote(session) {
                            publish(&snapshots, &state);
                        }
                    }
                    Some(ServerMessage::Subscribed { .. }) | Some(ServerMessage::Pong) => {}
                    Some(ServerMessage::Error { message }) => {
                        warn!("relay error on update feed: {message}");
                    }
                    None => {
                        warn!("update feed closed, continuing on local clock");
                        feed_open = false;
                    }
                }
            }
            request = requests.recv() => {
                let Some(EngineRequest { command, reply }) = request else {
                    break;
                };
                let result = command_step(
                    &mut state,
                    &client,
                    &target,
                    &mut pending,
                    &snapshots,
                    command,
                )
                .await;
                let _ = reply.send(result);
            }
        }
    }

    subscription.close().await;
}

async fn tick_step(
    state: &mut EngineState,
    client: &GatewayClient,
    target: &SessionRef,
    pending: &mut Option<SessionPatch>,
    snapshots: &watch::Sender<Session>,
) {
    let was_running = state.session().phase == Phase::Running;
    let patch = state.on_tick();
    if was_running {
        publish(snapshots, state);
    }

    if let Some(patch) = patch {
        queue_push(pending, patch);
    }

    if state.role() != Role::Driver {
        return;
    }
    let Some(patch) = pending.take() else {
        return;
    };
    match client.patch_session(target, &patch).await {
        Ok(row) => state.absorb_ack(&row),
        Err(err) if err.is_transient() => {
            debug!("checkpoint push failed, retrying next tick: {err}");
            *pending = Some(patch);
        }
        Err(err) => {
            warn!("checkpoint push rejected, dropping: {err}");
        }
    }
}

async fn command_step(
    state: &mut EngineState,
    client: &GatewayClient,
    target: &SessionRef,
    pending: &mut Option<SessionPatch>,
    snapshots: &watch::Sender<Session>,
    command: Command,
) -> Result<(), EngineError> {
    let patch = state.on_command(&command)?;

    match state.role() {
        Role::Driver => {
            // Already applied locally; the push follows.
            publish(snapshots, state);
            match client.patch_session(target, &patch).await {
                Ok(row) => {
                    state.absorb_ack(&row);
                    Ok(())
                }
                Err(err) if err.is_transient() => {
                    warn!("command push deferred: {err}");
                    queue_push(pending, patch);
                    Ok(())
                }
                Err(err) => Err(EngineError::Sync(err.to_string())),
            }
        }
        Role::Observer => {
            // Observers change state only through the relay's answer.
            let row = client
                .patch_session(target, &patch)
                .await
                .map_err(|err| EngineError::Sync(err.to_string()))?;
            if state.on_remote(row) {
                publish(snapshots, state);
            }
            Ok(())
        }
    }
}

/// Merge a new patch over whatever is still waiting to be pushed. Newer
/// fields win; untouched fields survive.
fn queue_push(pending: &mut Option<SessionPatch>, patch: SessionPatch) {
    match pending {
        Some(prev) => {
            if patch.phase.is_some() {
                prev.phase = patch.phase;
            }
            if patch.active_step_index.is_some() {
                prev.active_step_index = patch.active_step_index;
            }
            if patch.time_remaining.is_some() {
                prev.time_remaining = patch.time_remaining;
            }
            if patch.total_duration.is_some() {
                prev.total_duration = patch.total_duration;
            }
            if patch.steps.is_some() {
                prev.steps = patch.steps;
            }
        }
        None => *pending = Some(patch),
    }
}

fn publish(snapshots: &watch::Sender<Session>, state: &EngineState) {
    snapshots.send_replace(state.session().clone());
}
