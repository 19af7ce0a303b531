//! Crash report endpoint (component G: `crash_watcher`).

use super::AppState;
use crate::ring::LogFilter;
use axum::extract::State;
use axum::Json;

pub async fn latest(State(state): State<AppState>) -> Json<Option<crate::model::LogEntry>> {
    let filter = LogFilter {
        source: Some(crate::model::SourceTag::Crash),
        ..Default::default()
    };
    let page = state.ring.query(&filter, usize::MAX, 0);
    Json(page.entries.into_iter().last())
}
