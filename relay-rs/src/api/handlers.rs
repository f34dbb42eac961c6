//! API request handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::admin::BackupMetadata;
use crate::context::RelayContext;
use crate::error::RelayError;
use crate::postfix::{LogTail, Provider, QueueEntry, RelayConfig, RelayOutcome, TestEmail, TestEmailReport};
use crate::store::{RelaySummary, Sender};

/// Shared application state
pub struct AppState {
    pub relay: RelayContext,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: msg.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// Map a relay error to its HTTP status
pub fn status_for(e: &RelayError) -> StatusCode {
    match e {
        RelayError::Validation(_) => StatusCode::BAD_REQUEST,
        RelayError::NotFound(_) => StatusCode::NOT_FOUND,
        RelayError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        RelayError::ServiceDown(_) => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::UnsupportedPackageManager(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(e: RelayError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (status, Json(ApiError::new(e.to_string())))
}

/// Plain success response
#[derive(Debug, Serialize)]
pub struct Message {
    pub status: &'static str,
    pub message: String,
}

impl Message {
    pub fn success(msg: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success",
            message: msg.into(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub senders_count: usize,
    pub queue_status: String,
    pub postfix_running: bool,
    pub relayhost: Option<String>,
    pub relay: Option<RelaySummary>,
}

/// One-line description of the queue for the status page
fn describe_queue(queue: Result<Vec<QueueEntry>, RelayError>) -> String {
    match queue {
        Ok(entries) if entries.is_empty() => "Mail queue is empty".to_string(),
        Ok(entries) => format!("{} message(s) in queue", entries.len()),
        Err(RelayError::ServiceDown(_)) => "Postfix not running properly".to_string(),
        Err(RelayError::Timeout { .. }) => {
            "Command timed out - Postfix may not be responding".to_string()
        }
        Err(RelayError::CommandNotFound(_)) => "postqueue command not found".to_string(),
        Err(e) => format!("Error: {}", e),
    }
}

/// GET /api/status
pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let ctx = &state.relay;

    let senders = ctx.senders.list().await.map_err(api_error)?;
    let queue_status = describe_queue(ctx.queue.list().await);
    let postfix_running = ctx
        .services
        .is_service_active(ctx.services.service_name())
        .await;
    let relayhost = ctx.configurator.current_relayhost().await.unwrap_or_else(|e| {
        warn!("Could not read relayhost: {}", e);
        None
    });
    let relay = ctx.relay_store.summary().await.map_err(api_error)?;

    Ok(Json(StatusResponse {
        senders_count: senders.len(),
        queue_status,
        postfix_running,
        relayhost,
        relay,
    }))
}

/// GET /api/senders
pub async fn list_senders(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Sender>>> {
    state.relay.senders.list().await.map(Json).map_err(api_error)
}

#[derive(Debug, Serialize)]
pub struct SenderCreated {
    pub status: &'static str,
    pub id: usize,
}

/// POST /api/senders
pub async fn add_sender(
    State(state): State<Arc<AppState>>,
    Json(sender): Json<Sender>,
) -> ApiResult<(StatusCode, Json<SenderCreated>)> {
    let id = state.relay.senders.add(sender).await.map_err(api_error)?;
    Ok((
        StatusCode::CREATED,
        Json(SenderCreated {
            status: "success",
            id,
        }),
    ))
}

/// GET /api/senders/:id
pub async fn get_sender(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
) -> ApiResult<Json<Sender>> {
    state.relay.senders.get(id).await.map(Json).map_err(api_error)
}

/// PUT /api/senders/:id
pub async fn update_sender(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
    Json(sender): Json<Sender>,
) -> ApiResult<Json<Message>> {
    state
        .relay
        .senders
        .update(id, sender)
        .await
        .map_err(api_error)?;
    Ok(Message::success(format!("Sender {} updated", id)))
}

/// DELETE /api/senders/:id
pub async fn delete_sender(
    State(state): State<Arc<AppState>>,
    Path(id): Path<usize>,
) -> ApiResult<Json<Message>> {
    let removed = state.relay.senders.delete(id).await.map_err(api_error)?;
    Ok(Message::success(format!("Sender {} deleted", removed.email)))
}

/// Relay settings; missing host and port come from the provider preset
#[derive(Clone, Deserialize)]
pub struct ConfigureSaslRequest {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub relay_host: Option<String>,
    #[serde(default)]
    pub relay_port: Option<u16>,
    pub username: String,
    pub password: String,
}

impl ConfigureSaslRequest {
    fn into_relay(self) -> RelayConfig {
        let preset = self.provider.preset();
        RelayConfig {
            relay_host: self
                .relay_host
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| preset.relay_host.to_string()),
            relay_port: self.relay_port.unwrap_or(preset.relay_port),
            username: self.username,
            password: self.password,
            provider: self.provider,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigureSaslResponse {
    pub status: &'static str,
    pub message: String,
    pub outcome: RelayOutcome,
}

/// POST /api/configure_sasl
pub async fn configure_sasl(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfigureSaslRequest>,
) -> ApiResult<Json<ConfigureSaslResponse>> {
    let relay = req.into_relay();
    let ctx = &state.relay;

    let outcome = ctx
        .configurator
        .configure_relay(&relay)
        .await
        .map_err(api_error)?;
    ctx.relay_store.save(&relay).await.map_err(api_error)?;

    info!("Relay set to {}", relay.relayhost());
    Ok(Json(ConfigureSaslResponse {
        status: "success",
        message: "SASL configured successfully".to_string(),
        outcome,
    }))
}

/// POST /api/reset_sasl
pub async fn reset_sasl(State(state): State<Arc<AppState>>) -> ApiResult<Json<Message>> {
    let ctx = &state.relay;
    ctx.configurator.clear_relay().await.map_err(api_error)?;
    ctx.relay_store.clear().await.map_err(api_error)?;
    Ok(Message::success("SASL configuration has been reset"))
}

#[derive(Debug, Serialize)]
pub struct TestEmailResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub report: TestEmailReport,
}

/// POST /api/send_test_email
pub async fn send_test_email(
    State(state): State<Arc<AppState>>,
    Json(email): Json<TestEmail>,
) -> ApiResult<Json<TestEmailResponse>> {
    let report = state
        .relay
        .queue
        .send_test_email(&email)
        .await
        .map_err(api_error)?;
    Ok(Json(TestEmailResponse {
        status: "success",
        report,
    }))
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub status: &'static str,
    pub count: usize,
    pub queue: Vec<QueueEntry>,
}

/// GET /api/mail_queue
pub async fn mail_queue(State(state): State<Arc<AppState>>) -> ApiResult<Json<QueueResponse>> {
    let queue = state.relay.queue.list().await.map_err(api_error)?;
    Ok(Json(QueueResponse {
        status: "success",
        count: queue.len(),
        queue,
    }))
}

/// POST /api/flush_queue
pub async fn flush_queue(State(state): State<Arc<AppState>>) -> ApiResult<Json<Message>> {
    state.relay.queue.flush().await.map_err(api_error)?;
    Ok(Message::success("Mail queue has been flushed"))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub tail: LogTail,
}

/// GET /api/mail_log?lines=N
pub async fn mail_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<LogResponse>> {
    let tail = state
        .relay
        .mail_log
        .tail(query.lines)
        .await
        .map_err(api_error)?;
    Ok(Json(LogResponse {
        status: "success",
        tail,
    }))
}

#[derive(Debug, Serialize)]
pub struct BackupList {
    pub backups: Vec<BackupMetadata>,
    pub total_size: u64,
}

/// GET /api/backups
pub async fn list_backups(State(state): State<Arc<AppState>>) -> ApiResult<Json<BackupList>> {
    let backups = state.relay.backups.list_backups().await.map_err(api_error)?;
    let total_size = state.relay.backups.total_size().await.map_err(api_error)?;
    Ok(Json(BackupList {
        backups,
        total_size,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /api/backups
pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateBackupRequest>>,
) -> ApiResult<(StatusCode, Json<BackupMetadata>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let metadata = state
        .relay
        .backups
        .create_backup(req.name.as_deref())
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(metadata)))
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub status: &'static str,
    pub message: String,
    pub restored: Vec<PathBuf>,
}

/// POST /api/backups/:name/restore
pub async fn restore_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<RestoreResponse>> {
    let metadata = state
        .relay
        .backups
        .restore_backup(&name)
        .await
        .map_err(api_error)?;
    Ok(Json(RestoreResponse {
        status: "success",
        message: format!("Backup {} restored", name),
        restored: metadata.config_files,
    }))
}

/// DELETE /api/backups/:name
pub async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Message>> {
    state
        .relay
        .backups
        .delete_backup(&name)
        .await
        .map_err(api_error)?;
    Ok(Message::success(format!("Backup {} deleted", name)))
}
