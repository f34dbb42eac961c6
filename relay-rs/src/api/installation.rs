//! Installation wizard endpoints under `/api/installation`

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::handlers::{api_error, ApiResult, AppState};
use crate::install::{
    InputKind, InputValidation, InstallReport, InstallationStatus, UninstallResponse,
    WizardRequest, WizardStep,
};
use crate::postfix::ProviderPreset;
use crate::system::SystemProfile;

/// GET /api/installation/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<InstallationStatus> {
    Json(state.relay.installer.get_installation_status().await)
}

/// GET /api/installation/system
pub async fn system(State(state): State<Arc<AppState>>) -> Json<SystemProfile> {
    Json(state.relay.wizard.system_info().await)
}

/// GET /api/installation/providers
pub async fn providers(State(state): State<Arc<AppState>>) -> Json<&'static [ProviderPreset]> {
    Json(state.relay.wizard.provider_presets())
}

/// GET /api/installation/steps/:step
pub async fn step(
    State(state): State<Arc<AppState>>,
    Path(step): Path<u32>,
) -> ApiResult<Json<WizardStep>> {
    state
        .relay
        .wizard
        .wizard_step(step)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub input_type: InputKind,
    pub value: String,
}

/// POST /api/installation/validate
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Json<InputValidation> {
    Json(state.relay.wizard.validate_input(req.input_type, &req.value))
}

/// POST /api/installation/install
///
/// A failed step still returns the full report, with a 500 status.
pub async fn install(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WizardRequest>,
) -> ApiResult<(StatusCode, Json<InstallReport>)> {
    info!("Installation requested via API for provider {}", req.provider);

    let report = state
        .relay
        .wizard
        .install_with_data(&req)
        .await
        .map_err(api_error)?;

    let status = if report.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)))
}

/// POST /api/installation/uninstall
pub async fn uninstall(State(state): State<Arc<AppState>>) -> ApiResult<Json<UninstallResponse>> {
    info!("Uninstallation requested via API");
    state
        .relay
        .wizard
        .uninstall()
        .await
        .map(Json)
        .map_err(api_error)
}
