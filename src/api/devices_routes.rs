//! Device pool endpoints (component J).

use super::AppState;
use crate::devices::DeviceRecord;
use crate::error::AppResult;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

pub async fn pool(State(state): State<AppState>) -> AppResult<Json<Vec<DeviceRecord>>> {
    Ok(Json(state.devices.list()?))
}

#[derive(Debug, Deserialize)]
pub struct OwnerRequest {
    pub owner: String,
}

pub async fn claim(
    State(state): State<AppState>,
    Path(udid): Path<String>,
    Json(req): Json<OwnerRequest>,
) -> AppResult<Json<DeviceRecord>> {
    Ok(Json(state.devices.claim(&udid, &req.owner)?))
}

pub async fn release(
    State(state): State<AppState>,
    Path(udid): Path<String>,
    Json(req): Json<OwnerRequest>,
) -> AppResult<Json<()>> {
    state.devices.release(&udid, &req.owner)?;
    Ok(Json(()))
}

pub async fn cleanup(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let stale_after = chrono::Duration::seconds(state.config.adapters.stale_claim_secs as i64);
    Ok(Json(state.devices.cleanup(stale_after)?))
}

pub async fn refresh(State(state): State<AppState>, Path(udid): Path<String>) -> AppResult<Json<()>> {
    state.devices.refresh(&udid)?;
    Ok(Json(()))
}

pub async fn resolve(State(state): State<AppState>, Path(selector): Path<String>) -> AppResult<Json<DeviceRecord>> {
    Ok(Json(state.devices.resolve(&selector)?))
}

#[derive(Debug, Deserialize)]
pub struct EnsureRequest {
    pub platform: Option<String>,
    pub owner: String,
}

pub async fn ensure(State(state): State<AppState>, Json(req): Json<EnsureRequest>) -> AppResult<Json<DeviceRecord>> {
    Ok(Json(state.devices.ensure(req.platform.as_deref(), &req.owner)?))
}
