//! Ambient server endpoints, carried regardless of the spec's feature
//! Non-goals: every daemon needs a status probe and a way to see its own
//! diagnostic log without shelling in.

use super::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub version: &'static str,
    pub uptime_secs: i64,
    pub http_port: u16,
    pub ring_len: usize,
    pub ring_capacity: usize,
    pub flow_count: usize,
    pub adapters: Vec<crate::adapters::AdapterStatus>,
    pub proxy_running: bool,
}

pub async fn status(State(state): State<AppState>) -> Json<ServerStatus> {
    let uptime_secs = (chrono::Utc::now() - state.start_time).num_seconds();
    Json(ServerStatus {
        version: crate::config::VERSION,
        uptime_secs,
        http_port: state.config.port,
        ring_len: state.ring.len(),
        ring_capacity: state.config.ring.capacity,
        flow_count: state.flows.len(),
        adapters: state.supervisor.statuses().await,
        proxy_running: state.addon.is_running().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct ServerLogsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    200
}

#[derive(Debug, Serialize)]
pub struct ServerLogsResponse {
    pub entries: Vec<crate::logging::LogEntry>,
}

pub async fn logs(State(state): State<AppState>, Query(params): Query<ServerLogsQuery>) -> Json<ServerLogsResponse> {
    Json(ServerLogsResponse {
        entries: state.log_buffer.tail(params.limit.min(1000)),
    })
}
