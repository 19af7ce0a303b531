//! Log query/summary endpoints over the ring (component C/E).

use super::AppState;
use crate::adapters::{AdapterFilter, AdapterStatus};
use crate::error::{AppError, AppResult};
use crate::model::{Level, SourceTag};
use crate::ring::LogFilter;
use crate::summarizer::{summarize_logs, Window};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub source: Option<String>,
    pub process: Option<String>,
    pub min_level: Option<String>,
    pub search: Option<String>,
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    pub until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

fn parse_source(s: &str) -> Option<SourceTag> {
    match s {
        "syslog" => Some(SourceTag::Syslog),
        "oslog" => Some(SourceTag::Oslog),
        "simulator" => Some(SourceTag::Simulator),
        "device" => Some(SourceTag::Device),
        "crash" => Some(SourceTag::Crash),
        "build" => Some(SourceTag::Build),
        "proxy" => Some(SourceTag::Proxy),
        "app_drain" => Some(SourceTag::AppDrain),
        "server" => Some(SourceTag::Server),
        _ => None,
    }
}

impl LogsQuery {
    fn to_filter(&self) -> LogFilter {
        LogFilter {
            source: self.source.as_deref().and_then(parse_source),
            process: self.process.clone(),
            min_level: self.min_level.as_deref().and_then(Level::parse),
            search: self.search.clone(),
            since: self.since,
            until: self.until,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub entries: Vec<crate::model::LogEntry>,
    pub total: usize,
    pub cursor: String,
}

pub async fn query(State(state): State<AppState>, Query(params): Query<LogsQuery>) -> AppResult<Json<LogsResponse>> {
    let filter = params.to_filter();
    let page = state.ring.query(&filter, params.limit.min(1000), params.offset);
    let cursor = crate::model::encode_cursor(state.ring.current_seq());
    Ok(Json(LogsResponse {
        entries: page.entries,
        total: page.total,
        cursor,
    }))
}

pub async fn errors(State(state): State<AppState>, Query(mut params): Query<LogsQuery>) -> AppResult<Json<LogsResponse>> {
    params.min_level = Some("error".to_string());
    query(State(state), Query(params)).await
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    #[serde(default = "default_window")]
    pub window: String,
    pub process: Option<String>,
    pub since_cursor: Option<String>,
}

fn default_window() -> String {
    "5m".to_string()
}

pub async fn summary(State(state): State<AppState>, Query(params): Query<SummaryQuery>) -> AppResult<Json<crate::summarizer::LogSummary>> {
    let window = Window::parse(&params.window)
        .ok_or_else(|| crate::error::AppError::InvalidArgument(format!("unknown window {}", params.window)))?;
    let summary = summarize_logs(&state.ring, window, params.process.as_deref(), params.since_cursor.as_deref());
    Ok(Json(summary))
}

/// Adapter statuses (spec §6: `GET /api/v1/logs/sources` is "adapter
/// statuses", not a list of process names seen in the ring).
pub async fn sources(State(state): State<AppState>) -> Json<Vec<AdapterStatus>> {
    Json(state.supervisor.statuses().await)
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub adapter: String,
    pub process: Option<String>,
    pub exclude_substring: Option<String>,
}

/// Reconfigure a running adapter's filter (spec §6: `POST /api/v1/logs/filter`).
pub async fn filter(State(state): State<AppState>, Json(req): Json<FilterRequest>) -> AppResult<Json<()>> {
    let filter = AdapterFilter {
        process: req.process,
        exclude_substring: req.exclude_substring,
    };
    if state.supervisor.reconfigure(&req.adapter, filter).await {
        Ok(Json(()))
    } else {
        Err(AppError::NotFound(format!("adapter {}", req.adapter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_rejects_unknown() {
        assert!(parse_source("bogus").is_none());
        assert_eq!(parse_source("crash"), Some(SourceTag::Crash));
    }
}
