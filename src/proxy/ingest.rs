//! Internal endpoint the mitmproxy addon posts to (spec §4.I / §6:
//! `POST /api/v1/proxy/internal/flow`). Mounted on the main API router
//! but never gated by the API key — the addon subprocess has no key, only
//! the shared secret minted alongside it in `addon::load_or_create_secret`.
//!
//! Two calls per flow, matching mitmproxy's request/response hook split:
//! `check` runs before the request leaves the addon (mock short-circuit,
//! then intercept hold-and-wait); `complete` runs once the real response
//! (or a transport error) is known, and is what actually populates the
//! flow store.

use super::addon::validate_secret;
use super::intercept::ReleaseDecision;
use super::proxy_sink::{emit_flow_summary, FlowSummary};
use super::{host_and_path, truncate_body, Flow, FlowRequest, FlowResponse, FlowSource};
use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

const SECRET_HEADER: &str = "x-quern-secret";

fn require_secret(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let presented = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
    if validate_secret(state.addon.shared_secret(), presented) {
        Ok(())
    } else {
        Err(AppError::AuthRequired)
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub flow_id: String,
    pub request: FlowRequest,
}

#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CheckResponse {
    PassThrough,
    Mock { response: FlowResponse },
    Modify { request: Option<FlowRequest> },
}

/// Runs before the request is forwarded: mocks win outright (the addon
/// never contacts the real server), otherwise a matching intercept rule
/// holds the flow until released (or the registry's timeout passes it
/// through unmodified).
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, AppError> {
    require_secret(&state, &headers)?;

    let (host, path) = host_and_path(&req.request.url);
    let method = req.request.method.clone();

    if let Some(mock) = state.mocks.matching(&method, &host, &path) {
        state.flows.insert(Flow {
            id: req.flow_id.clone(),
            timestamp: chrono::Utc::now(),
            client_ip: "127.0.0.1".to_string(),
            device_udid: None,
            request: req.request,
            response: Some(mock.response.clone()),
            error: None,
            duration_ms: Some(0),
            source: FlowSource::Mock,
        });
        return Ok(Json(CheckResponse::Mock { response: mock.response }));
    }

    let Some(rule) = state.intercepts.matching_rule(&method, &host, &path) else {
        return Ok(Json(CheckResponse::PassThrough));
    };

    let rx = state.intercepts.hold(req.flow_id.clone(), rule.id.clone(), req.request);
    let decision = tokio::time::timeout(state.intercepts.default_timeout(), rx)
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or(ReleaseDecision::PassThrough);

    Ok(Json(match decision {
        ReleaseDecision::PassThrough => CheckResponse::PassThrough,
        ReleaseDecision::Modify { request } => CheckResponse::Modify { request },
    }))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub id: String,
    pub client_ip: String,
    pub device_udid: Option<String>,
    pub request: FlowRequest,
    pub response: Option<FlowResponse>,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Runs once the real response (or a transport failure) is known: stores
/// the flow (bodies truncated to `proxy.max_body_bytes`) and emits its
/// one-line log echo through the shared pipeline.
pub async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<CompleteRequest>,
) -> Result<Json<()>, AppError> {
    require_secret(&state, &headers)?;

    let max_body = state.config.proxy.max_body_bytes;
    let (req_body, req_truncated) = truncate_body(req.request.body.take(), max_body);
    req.request.body = req_body;
    req.request.body_truncated = req_truncated || req.request.body_truncated;

    if let Some(resp) = req.response.as_mut() {
        let (body, truncated) = truncate_body(resp.body.take(), max_body);
        resp.body = body;
        resp.body_truncated = truncated || resp.body_truncated;
    }

    emit_flow_summary(
        &state.pipeline,
        FlowSummary {
            method: &req.request.method,
            url: &req.request.url,
            status: req.response.as_ref().map(|r| r.status),
            duration_ms: req.duration_ms,
            error: req.error.as_deref(),
        },
    );

    state.flows.insert(Flow {
        id: req.id,
        timestamp: chrono::Utc::now(),
        client_ip: req.client_ip,
        device_udid: req.device_udid,
        request: req.request,
        response: req.response,
        error: req.error,
        duration_ms: req.duration_ms,
        source: FlowSource::Live,
    });

    Ok(Json(()))
}
