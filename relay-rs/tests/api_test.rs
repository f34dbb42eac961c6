mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::sandbox;
use relay_rs::api::{router, AppState};
use relay_rs::context::RelayContext;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(sb: &common::Sandbox) -> Router {
    let relay = RelayContext::from_config(sb.config.clone(), sb.runner.clone());
    router(Arc::new(AppState { relay }))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let sb = sandbox();
    let (status, body) = call(&app(&sb), "GET", "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_sender_crud() {
    let sb = sandbox();
    let app = app(&sb);

    let (status, body) = call(
        &app,
        "POST",
        "/api/senders",
        Some(json!({"name": "Alerts", "email": "alerts@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 0);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/senders/0",
        Some(json!({"name": "Ops", "email": "ops@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (_, body) = call(&app, "GET", "/api/senders/0", None).await;
    assert_eq!(body["email"], "ops@example.com");

    let (status, body) = call(&app, "DELETE", "/api/senders/3", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("not found"));

    let (status, _) = call(&app, "DELETE", "/api/senders/0", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, "GET", "/api/senders", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_invalid_sender_is_bad_request() {
    let sb = sandbox();
    let (status, body) = call(
        &app(&sb),
        "POST",
        "/api/senders",
        Some(json!({"name": "Broken", "email": "not-an-address"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(!sb.config.paths.sender_store.exists());
}

#[tokio::test]
async fn test_configure_sasl_uses_preset_host() {
    let sb = sandbox();
    let app = app(&sb);

    let (status, body) = call(
        &app,
        "POST",
        "/api/configure_sasl",
        Some(json!({
            "provider": "gmail",
            "username": "me@gmail.com",
            "password": "app-password"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(sb.main_cf().contains("relayhost = [smtp.gmail.com]:587"));
    assert_eq!(
        sb.sasl_passwd(),
        "[smtp.gmail.com]:587 me@gmail.com:app-password\n"
    );

    let (_, status_body) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(status_body["relayhost"], "[smtp.gmail.com]:587");
    assert_eq!(status_body["senders_count"], 0);
    assert!(!status_body.to_string().contains("app-password"));

    let (status, _) = call(&app, "POST", "/api/reset_sasl", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!sb.config.paths.sasl_passwd().exists());
}

#[tokio::test]
async fn test_mail_queue_listing() {
    let sb = sandbox();
    sb.runner.on_ok(
        "postqueue -p",
        "-Queue ID-  --Size-- ----Arrival Time---- -Sender/Recipient-------\n\
         4F9D21C0A8*    1523 Tue Mar  5 10:15:42  alerts@example.com\n\
         \x20                                        ops@example.org\n\
         \n\
         -- 2 Kbytes in 1 Request.\n",
    );

    let (status, body) = call(&app(&sb), "GET", "/api/mail_queue", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["queue"][0]["queue_id"], "4F9D21C0A8");
    assert_eq!(body["queue"][0]["state"], "active");
    assert_eq!(body["queue"][0]["recipients"], json!(["ops@example.org"]));
}

#[tokio::test]
async fn test_mail_queue_when_postfix_is_down() {
    let sb = sandbox();
    sb.runner
        .on("postqueue -p", 69, "", "postqueue: fatal: Mail system is down");

    let (status, body) = call(&app(&sb), "GET", "/api/mail_queue", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_backup_endpoints() {
    let sb = sandbox();
    let app = app(&sb);

    let (status, body) = call(
        &app,
        "POST",
        "/api/backups",
        Some(json!({"name": "nightly"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["name"], "nightly");

    let (_, body) = call(&app, "GET", "/api/backups", None).await;
    assert_eq!(body["backups"].as_array().unwrap().len(), 1);

    let (status, _) = call(&app, "POST", "/api/backups/nightly/restore", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "DELETE", "/api/backups/nightly", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "POST", "/api/backups/nightly/restore", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_installation_wizard_routes() {
    let sb = sandbox();
    let app = app(&sb);

    let (status, body) = call(&app, "GET", "/api/installation/steps/2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], 2);
    assert_eq!(body["total_steps"], 5);

    let (status, body) = call(&app, "GET", "/api/installation/steps/9", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (_, body) = call(&app, "GET", "/api/installation/providers", None).await;
    assert_eq!(body.as_array().unwrap().len(), 5);

    let (_, body) = call(
        &app,
        "POST",
        "/api/installation/validate",
        Some(json!({"input_type": "port", "value": "99999"})),
    )
    .await;
    assert_eq!(body["valid"], false);

    let (_, body) = call(
        &app,
        "POST",
        "/api/installation/validate",
        Some(json!({"input_type": "email", "value": "me@example.com"})),
    )
    .await;
    assert_eq!(body["valid"], true);
}
