//! xcodebuild output parsing endpoint (component G: `build_parser`).

use super::AppState;
use crate::adapters::build_parser::{parse_build_output, BuildResult};
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ParseRequest {
    pub output: String,
    #[serde(default = "default_process")]
    pub process: String,
}

fn default_process() -> String {
    "xcodebuild".to_string()
}

pub async fn parse(State(state): State<AppState>, Json(req): Json<ParseRequest>) -> Json<BuildResult> {
    let (result, entries) = parse_build_output(&req.output, &req.process);
    for entry in entries {
        state.pipeline.emit(entry);
    }
    *state.last_build.lock().unwrap() = Some(result.clone());
    Json(result)
}

pub async fn latest(State(state): State<AppState>) -> Json<Option<BuildResult>> {
    Json(state.last_build.lock().unwrap().clone())
}
