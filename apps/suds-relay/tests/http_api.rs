use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use suds_core::Session;
use suds_relay::config::Config;
use suds_relay::gateway::SessionGateway;
use suds_relay::router;
use suds_relay::storage::{MemoryStore, SessionStore};

fn app() -> Router {
    let gateway = Arc::new(SessionGateway::new(
        Arc::new(MemoryStore::new()),
        &Config::default(),
    ));
    router(gateway)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    // Stands in for the connect-info the real listener would attach.
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_session(app: &Router, total: u32) -> Value {
    let response = app
        .clone()
        .oneshot(request(
            "POST",
            "/session",
            Some(json!({ "total_duration": total })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

#[test_deadline::tokio_timeout_test(30)]
async fn health_endpoint_responds() {
    let response = app()
        .oneshot(request("GET", "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[test_deadline::tokio_timeout_test(30)]
async fn create_then_fetch_round_trip() {
    let app = app();
    let created = create_session(&app, 300).await;

    let code = created["session"]["session_code"].as_str().unwrap();
    assert_eq!(created["session"]["state"], "setup");
    assert_eq!(created["session"]["total_duration"], 300);
    assert_eq!(created["session"]["time_remaining"], 300);

    let response = app
        .oneshot(request("GET", &format!("/session?code={code}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["session"]["session_code"], code);
    assert_eq!(fetched["session"]["total_duration"], 300);
}

#[test_deadline::tokio_timeout_test(30)]
async fn fetch_rejects_malformed_and_missing_codes() {
    let app = app();

    let response = app
        .clone()
        .oneshot(request("GET", "/session?code=ab!", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid"));

    let response = app
        .clone()
        .oneshot(request("GET", "/session?code=ZZZZ", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(request("GET", "/session", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test_deadline::tokio_timeout_test(30)]
async fn expired_session_is_gone_not_missing() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(SessionGateway::new(store.clone(), &Config::default()));
    let app = router(gateway);

    let mut stale = Session::new("AB23".into(), 300);
    stale.created_at -= 2 * 86_400;
    store.insert_new(&stale).await.unwrap();

    let response = app
        .oneshot(request("GET", "/session?code=AB23", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[test_deadline::tokio_timeout_test(30)]
async fn lookup_is_case_insensitive() {
    let app = app();
    let created = create_session(&app, 300).await;
    let code = created["session"]["session_code"]
        .as_str()
        .unwrap()
        .to_lowercase();

    let response = app
        .oneshot(request("GET", &format!("/session?code={code}"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[test_deadline::tokio_timeout_test(30)]
async fn patch_updates_phase_and_bumps_marker() {
    let app = app();
    let created = create_session(&app, 300).await;
    let code = created["session"]["session_code"].as_str().unwrap();
    let before = created["session"]["last_update"].as_u64().unwrap();

    let response = app
        .oneshot(request(
            "PATCH",
            &format!("/session?code={code}"),
            Some(json!({ "state": "waiting" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["session"]["state"], "waiting");
    assert!(body["session"]["last_update"].as_u64().unwrap() > before);
}

#[test_deadline::tokio_timeout_test(30)]
async fn patch_by_id_works() {
    let app = app();
    let created = create_session(&app, 300).await;
    let id = created["session"]["id"].as_str().unwrap();

    let response = app
        .oneshot(request(
            "PATCH",
            &format!("/session?id={id}"),
            Some(json!({ "time_remaining": 120 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["session"]["time_remaining"], 120);
}

#[test_deadline::tokio_timeout_test(30)]
async fn patch_rejects_unknown_fields_and_bad_phase() {
    let app = app();
    let created = create_session(&app, 300).await;
    let code = created["session"]["session_code"].as_str().unwrap();

    // Field outside the whitelist.
    let response = app
        .clone()
        .oneshot(request(
            "PATCH",
            &format!("/session?code={code}"),
            Some(json!({ "created_at": 0 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Out-of-enum phase value.
    let response = app
        .clone()
        .oneshot(request(
            "PATCH",
            &format!("/session?code={code}"),
            Some(json!({ "state": "sprinting" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Row must be untouched after both rejections.
    let response = app
        .oneshot(request("GET", &format!("/session?code={code}"), None))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["session"]["state"], "setup");
}

#[test_deadline::tokio_timeout_test(30)]
async fn patch_without_identifier_is_rejected() {
    let response = app()
        .oneshot(request(
            "PATCH",
            "/session",
            Some(json!({ "state": "waiting" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[test_deadline::tokio_timeout_test(30)]
async fn replacing_steps_recomputes_total_duration() {
    let app = app();
    let created = create_session(&app, 600).await;
    let code = created["session"]["session_code"].as_str().unwrap();

    let steps = json!([
        { "id": "rinse", "label": "Rinse", "duration": 60, "active": true },
        { "id": "shampoo", "label": "Shampoo", "duration": 120, "active": false },
        { "id": "soap", "label": "Soap", "duration": 180, "active": true },
    ]);
    let response = app
        .oneshot(request(
            "PATCH",
            &format!("/session?code={code}"),
            Some(json!({ "steps": steps })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    // Inactive steps do not count toward the total.
    assert_eq!(body["session"]["total_duration"], 240);
}

#[test_deadline::tokio_timeout_test(60)]
async fn thirty_first_request_in_window_is_rate_limited() {
    let app = app();
    let created = create_session(&app, 300).await;
    let code = created["session"]["session_code"].as_str().unwrap();

    // The create above consumed one request from the same client.
    for i in 2..=30 {
        let response = app
            .clone()
            .oneshot(request(
                "PATCH",
                &format!("/session?code={code}"),
                Some(json!({ "time_remaining": 100 + i })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = app
        .oneshot(request(
            "PATCH",
            &format!("/session?code={code}"),
            Some(json!({ "time_remaining": 99 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
