//! Full-stack pairing test: a real relay on a local socket, one driver
//! and one observer talking to it through the engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use suds_core::{Phase, Session};
use suds_engine::SessionController;
use suds_relay::config::Config;
use suds_relay::gateway::SessionGateway;
use suds_relay::router;
use suds_relay::storage::MemoryStore;

async fn spawn_relay() -> SocketAddr {
    let gateway = Arc::new(SessionGateway::new(
        Arc::new(MemoryStore::new()),
        &Config::default(),
    ));
    let app = router(gateway);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn wait_for<F>(rx: &mut watch::Receiver<Session>, what: &str, predicate: F) -> Session
where
    F: Fn(&Session) -> bool,
{
    let result = timeout(Duration::from_secs(15), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if predicate(&current) {
                return current;
            }
            if rx.changed().await.is_err() {
                panic!("snapshot channel closed while waiting for {what}");
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

#[test_deadline::tokio_timeout_test(90)]
async fn two_devices_stay_in_sync() {
    let addr = spawn_relay().await;
    let server = format!("http://{addr}");

    // Host side: create grants the requested total and lays out a plan.
    let host = SessionController::create(&server, Some(12)).await.unwrap();
    let mut host_view = host.watch();

    let initial = host_view.borrow().clone();
    assert_eq!(initial.phase, Phase::Setup);
    assert_eq!(initial.total_duration_seconds, 12);
    assert!(!initial.steps.is_empty());

    // Observer joins with a sloppily typed code.
    let sloppy = format!(" {} ", host.code().to_lowercase());
    let observer = SessionController::join(&server, &sloppy).await.unwrap();
    let mut observer_view = observer.watch();
    assert_eq!(observer.code(), host.code());

    // The join nudges the session out of setup on both sides.
    wait_for(&mut host_view, "host to see waiting", |s| {
        s.phase == Phase::Waiting
    })
    .await;

    host.start().await.unwrap();
    let running = wait_for(&mut observer_view, "observer to see running", |s| {
        s.phase == Phase::Running
    })
    .await;
    assert_eq!(running.total_duration_seconds, 12);

    // The driver advances steps on its own; the observer only mirrors.
    wait_for(&mut observer_view, "observer to see a step advance", |s| {
        s.phase == Phase::Running && s.active_step_index >= 1
    })
    .await;

    // Control from the observer side: the driver must obey.
    observer.pause().await.unwrap();
    let paused = wait_for(&mut host_view, "host to see pause", |s| {
        s.phase == Phase::Paused
    })
    .await;
    let frozen = paused.time_remaining_seconds;

    // No countdown while paused.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(host_view.borrow().time_remaining_seconds, frozen);
    assert_eq!(host_view.borrow().phase, Phase::Paused);

    observer.resume().await.unwrap();
    wait_for(&mut host_view, "host to resume", |s| {
        s.phase == Phase::Running
    })
    .await;

    // Host winds the session back down; both sides land on waiting.
    host.stop().await.unwrap();
    wait_for(&mut observer_view, "observer to see stop", |s| {
        s.phase == Phase::Waiting
    })
    .await;
    assert_eq!(host_view.borrow().phase, Phase::Waiting);

    observer.leave().await;
    host.leave().await;
}

#[test_deadline::tokio_timeout_test(30)]
async fn join_rejects_bad_and_unknown_codes() {
    let addr = spawn_relay().await;
    let server = format!("http://{addr}");

    // Malformed code never reaches the relay.
    let err = SessionController::join(&server, "ab!").await.unwrap_err();
    assert!(matches!(err, suds_core::GatewayError::InvalidCode));

    // Well-formed but unknown code is a distinct failure.
    let err = SessionController::join(&server, "ZZZZ").await.unwrap_err();
    assert!(matches!(err, suds_core::GatewayError::NotFound));
}

#[test_deadline::tokio_timeout_test(60)]
async fn driver_finishes_after_the_last_step() {
    let addr = spawn_relay().await;
    let server = format!("http://{addr}");

    // Smallest plan the relay accepts: four one-second steps.
    let host = SessionController::create(&server, Some(4)).await.unwrap();
    let mut host_view = host.watch();

    let observer = SessionController::join(&server, host.code()).await.unwrap();
    let mut observer_view = observer.watch();

    wait_for(&mut host_view, "host to see waiting", |s| {
        s.phase == Phase::Waiting
    })
    .await;

    host.start().await.unwrap();
    let finished = wait_for(&mut host_view, "host to finish", |s| {
        s.phase == Phase::Finished
    })
    .await;
    assert_eq!(finished.time_remaining_seconds, 0);

    // The observer never decides this on its own but must mirror it.
    wait_for(&mut observer_view, "observer to see finished", |s| {
        s.phase == Phase::Finished
    })
    .await;

    observer.leave().await;
    host.leave().await;
}
