//! Proxy flow store endpoints (component I).

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::proxy::intercept::{InterceptRule, ReleaseDecision};
use crate::proxy::mocks::MockRule;
use crate::proxy::{Flow, FlowFilter};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct FlowsQuery {
    pub host: Option<String>,
    pub status_bucket: Option<String>,
    pub device_udid: Option<String>,
    pub client_ip: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct FlowsResponse {
    pub flows: Vec<Flow>,
    pub total: usize,
}

pub async fn query_flows(State(state): State<AppState>, Query(params): Query<FlowsQuery>) -> Json<FlowsResponse> {
    let filter = FlowFilter {
        host: params.host,
        status_bucket: params.status_bucket,
        device_udid: params.device_udid,
        client_ip: params.client_ip,
    };
    let (flows, total) = state.flows.query(&filter, params.limit.min(1000), params.offset);
    Json(FlowsResponse { flows, total })
}

pub async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Flow>> {
    Ok(Json(state.flows.get(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct WaitFlowQuery {
    pub host: Option<String>,
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

const MAX_WAIT_TIMEOUT_MS: u64 = 60_000;

/// Poll until a flow matching `host` appears, or the capped timeout
/// elapses. Mirrors `api::longpoll::wait_for_log`'s always-200 contract.
pub async fn wait_for_flow(State(state): State<AppState>, Query(params): Query<WaitFlowQuery>) -> Json<FlowsResponse> {
    let timeout = Duration::from_millis(params.timeout_ms.min(MAX_WAIT_TIMEOUT_MS));
    let deadline = tokio::time::Instant::now() + timeout;
    let filter = FlowFilter {
        host: params.host,
        ..Default::default()
    };
    loop {
        let (flows, total) = state.flows.query(&filter, 1, 0);
        if !flows.is_empty() || tokio::time::Instant::now() >= deadline {
            return Json(FlowsResponse { flows, total });
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

#[derive(Debug, Serialize)]
pub struct SlowFlow {
    pub id: String,
    pub host: String,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorHighlight {
    pub id: String,
    pub host: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ProxySummary {
    pub total_flows: usize,
    pub by_status_bucket: std::collections::HashMap<&'static str, usize>,
    pub by_host: std::collections::HashMap<String, usize>,
    pub slowest: Vec<SlowFlow>,
    pub error_highlights: Vec<ErrorHighlight>,
    pub running: bool,
    pub cursor: String,
}

#[derive(Debug, Deserialize)]
pub struct ProxySummaryQuery {
    pub since_cursor: Option<String>,
}

const SLOWEST_LIMIT: usize = 5;
const ERROR_HIGHLIGHT_LIMIT: usize = 5;

/// Flow digest (spec §4.E: "groups by host, counts by status-class,
/// slowest requests, error highlights"), cursor-capable like the log
/// summarizer so a client can ask for only what's new since its last call.
pub async fn summary(State(state): State<AppState>, Query(params): Query<ProxySummaryQuery>) -> Json<ProxySummary> {
    let since_seq = params.since_cursor.as_deref().and_then(crate::model::decode_cursor).unwrap_or(0);
    let (all, total) = state.flows.query(&FlowFilter::default(), usize::MAX, 0);
    let fresh: Vec<&Flow> = all.iter().filter(|f| flow_seq(f) > since_seq).collect();

    let mut by_status_bucket = std::collections::HashMap::new();
    for bucket in ["2xx", "3xx", "4xx", "5xx", "other", "error", "pending"] {
        by_status_bucket.insert(bucket, fresh.iter().filter(|f| f.status_bucket() == bucket).count());
    }

    let mut by_host: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for flow in &fresh {
        *by_host.entry(flow.host()).or_insert(0) += 1;
    }

    let mut by_duration: Vec<&Flow> = fresh.iter().copied().filter(|f| f.duration_ms.is_some()).collect();
    by_duration.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
    let slowest = by_duration
        .into_iter()
        .take(SLOWEST_LIMIT)
        .map(|f| SlowFlow { id: f.id.clone(), host: f.host(), duration_ms: f.duration_ms.unwrap_or(0) })
        .collect();

    let error_highlights = fresh
        .iter()
        .copied()
        .filter_map(|f| f.error.as_ref().map(|e| ErrorHighlight { id: f.id.clone(), host: f.host(), error: e.clone() }))
        .take(ERROR_HIGHLIGHT_LIMIT)
        .collect();

    let cursor = crate::model::encode_cursor(fresh.iter().map(|f| flow_seq(f)).max().unwrap_or(since_seq).max(since_seq));

    Json(ProxySummary {
        total_flows: total,
        by_status_bucket,
        by_host,
        slowest,
        error_highlights,
        running: state.addon.is_running().await,
        cursor,
    })
}

/// Flows have no ring-style sequence number of their own; their insertion
/// timestamp (monotonic per process via `Utc::now()` at record time) is
/// used as the cursor-delta key instead.
fn flow_seq(flow: &Flow) -> u64 {
    flow.timestamp.timestamp_millis().max(0) as u64
}

pub async fn start(State(state): State<AppState>) -> AppResult<Json<()>> {
    let script_path = state.config.state_dir.join("mitmproxy_addon.py");
    state
        .addon
        .start(&script_path, state.config.proxy.port, state.config.port)
        .await
        .map_err(|e| AppError::SubprocessFailed(e.to_string()))?;
    Ok(Json(()))
}

pub async fn stop(State(state): State<AppState>) -> Json<()> {
    state.addon.stop(Duration::from_secs(5)).await;
    Json(())
}

pub async fn list_intercepts(State(state): State<AppState>) -> Json<Vec<InterceptRule>> {
    Json(state.intercepts.list_rules())
}

#[derive(Debug, Deserialize)]
pub struct NewInterceptRule {
    pub host_pattern: String,
    pub method: Option<String>,
    pub path_pattern: Option<String>,
}

pub async fn add_intercept(State(state): State<AppState>, Json(req): Json<NewInterceptRule>) -> Json<InterceptRule> {
    let rule = InterceptRule {
        id: Uuid::new_v4().to_string(),
        host_pattern: req.host_pattern,
        method: req.method,
        path_pattern: req.path_pattern,
    };
    state.intercepts.add_rule(rule.clone());
    Json(rule)
}

pub async fn remove_intercept(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<()>> {
    if state.intercepts.remove_rule(&id) {
        Ok(Json(()))
    } else {
        Err(AppError::NotFound(format!("intercept rule {id}")))
    }
}

#[derive(Debug, Serialize)]
pub struct HeldFlowSummary {
    pub flow_id: String,
    pub rule_id: String,
    pub held_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ListHeldQuery {
    #[serde(default)]
    pub timeout: u64,
}

const MAX_HELD_TIMEOUT_MS: u64 = 60_000;
const HELD_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Long-poll the held-flow queue (spec §4.I/§6: `list_held_flows(timeout)`,
/// `GET .../intercept/held?timeout=`), matching `longpoll::wait_for_log`'s
/// always-200 contract. `timeout` is in seconds, capped at 60.
pub async fn list_held(State(state): State<AppState>, Query(params): Query<ListHeldQuery>) -> Json<Vec<HeldFlowSummary>> {
    let timeout = Duration::from_millis((params.timeout * 1000).min(MAX_HELD_TIMEOUT_MS));
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let held = state.intercepts.list_held();
        if !held.is_empty() || tokio::time::Instant::now() >= deadline {
            return Json(
                held.into_iter()
                    .map(|(flow_id, rule_id, held_at)| HeldFlowSummary { flow_id, rule_id, held_at })
                    .collect(),
            );
        }
        tokio::time::sleep(HELD_POLL_INTERVAL).await;
    }
}

pub async fn release_held(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(decision): Json<ReleaseDecision>,
) -> AppResult<Json<()>> {
    if !state.intercepts.release(&flow_id, decision.clone()) {
        return Err(AppError::NotFound(format!("held flow {flow_id}")));
    }
    state
        .addon
        .release_held_flow(&flow_id, &decision)
        .await
        .map_err(|e| AppError::SubprocessFailed(e.to_string()))?;
    Ok(Json(()))
}

/// Re-send a previously captured flow's request through the addon.
/// Recorded as a normal new flow once it completes, same as any other
/// proxied request; this endpoint just triggers it.
pub async fn replay_flow(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<()>> {
    let flow = state.flows.get(&id)?;
    let decision = ReleaseDecision::Modify { request: Some(flow.request) };
    state
        .addon
        .release_held_flow(&Uuid::new_v4().to_string(), &decision)
        .await
        .map_err(|e| AppError::SubprocessFailed(e.to_string()))?;
    Ok(Json(()))
}

pub async fn list_mocks(State(state): State<AppState>) -> Json<Vec<MockRule>> {
    Json(state.mocks.list())
}

pub async fn add_mock(State(state): State<AppState>, Json(mut rule): Json<MockRule>) -> Json<MockRule> {
    rule.id = Uuid::new_v4().to_string();
    state.mocks.add(rule.clone());
    Json(rule)
}

pub async fn update_mock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut rule): Json<MockRule>,
) -> AppResult<Json<MockRule>> {
    rule.id = id.clone();
    if state.mocks.update(&id, rule.clone()) {
        Ok(Json(rule))
    } else {
        Err(AppError::NotFound(format!("mock rule {id}")))
    }
}

pub async fn remove_mock(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<()>> {
    if state.mocks.remove(&id) {
        Ok(Json(()))
    } else {
        Err(AppError::NotFound(format!("mock rule {id}")))
    }
}
