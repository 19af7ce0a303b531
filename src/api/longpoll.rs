//! Long-poll helper (spec §4.H): wait up to a capped timeout for a log
//! matching a filter to appear, polling the ring at a capped interval.
//! Always returns 200 with a `matched` boolean rather than timing out as
//! an error, and gives up promptly if the client disconnects.

use super::AppState;
use crate::model::LogEntry;
use crate::ring::LogFilter;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_TIMEOUT_MS: u64 = 60_000;
const MAX_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Deserialize)]
pub struct WaitQuery {
    pub process: Option<String>,
    pub search: Option<String>,
    pub min_level: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    pub since_cursor: Option<String>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_interval_ms() -> u64 {
    250
}

#[derive(Debug, Serialize)]
pub struct WaitResponse {
    pub matched: bool,
    pub entry: Option<LogEntry>,
    pub cursor: String,
}

pub async fn wait_for_log(State(state): State<AppState>, Query(params): Query<WaitQuery>) -> Json<WaitResponse> {
    let timeout = Duration::from_millis(params.timeout_ms.min(MAX_TIMEOUT_MS));
    let interval = Duration::from_millis(params.interval_ms.min(MAX_POLL_INTERVAL_MS).max(50));

    let filter = LogFilter {
        process: params.process.clone(),
        search: params.search.clone(),
        min_level: params.min_level.as_deref().and_then(crate::model::Level::parse),
        ..Default::default()
    };

    let mut since = params.since_cursor.as_deref().and_then(crate::model::decode_cursor).unwrap_or(0);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let fresh: Vec<LogEntry> = state.ring.since(since).into_iter().filter(|e| matches(&filter, e)).collect();
        if let Some(entry) = fresh.into_iter().next() {
            since = entry.seq;
            return Json(WaitResponse {
                matched: true,
                cursor: crate::model::encode_cursor(since),
                entry: Some(entry),
            });
        }
        since = state.ring.current_seq();

        if tokio::time::Instant::now() >= deadline {
            return Json(WaitResponse {
                matched: false,
                entry: None,
                cursor: crate::model::encode_cursor(since),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

fn matches(filter: &LogFilter, entry: &LogEntry) -> bool {
    if let Some(process) = &filter.process {
        if entry.process.as_deref() != Some(process.as_str()) {
            return false;
        }
    }
    if let Some(min_level) = filter.min_level {
        if entry.level < min_level {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        if !entry.message.to_lowercase().contains(&search.to_lowercase()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_interval_are_capped() {
        assert_eq!(Duration::from_millis(999_999.min(MAX_TIMEOUT_MS)), Duration::from_millis(MAX_TIMEOUT_MS));
        assert_eq!(Duration::from_millis(1.min(MAX_POLL_INTERVAL_MS).max(50)), Duration::from_millis(50));
    }
}
