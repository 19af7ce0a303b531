//! Component H — HTTP/SSE API (spec §4.H).
//!
//! One axum router binds every other component together. All routes
//! (besides `/health`) require `Authorization: Bearer <key>` or
//! `X-API-Key: <key>`, checked against the persisted API key from
//! `crate::state`. Errors flow out uniformly via `AppError`'s
//! `IntoResponse` impl; handlers just return `AppResult<Json<T>>`.

mod auth;
mod builds;
mod crashes;
mod devices_routes;
mod logs;
mod longpoll;
mod proxy_routes;
mod server_routes;
mod sse;

use crate::adapters::build_parser::BuildResult;
use crate::adapters::supervisor::Supervisor;
use crate::adapters::Pipeline;
use crate::config::Config;
use crate::devices::DevicePool;
use crate::logging::LogBuffer;
use crate::proxy::addon::MitmproxyAddon;
use crate::proxy::intercept::InterceptRegistry;
use crate::proxy::mocks::MockRegistry;
use crate::proxy::FlowStore;
use crate::ring::Ring;
use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;

/// Everything a handler might need, cloned cheaply per request (every
/// field is an `Arc` or already `Clone`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ring: Arc<Ring>,
    pub pipeline: Pipeline,
    pub supervisor: Arc<Supervisor>,
    pub flows: Arc<FlowStore>,
    pub intercepts: Arc<InterceptRegistry>,
    pub mocks: Arc<MockRegistry>,
    pub addon: Arc<MitmproxyAddon>,
    pub devices: Arc<DevicePool>,
    pub log_buffer: LogBuffer,
    pub api_key: Arc<String>,
    pub start_time: DateTime<Utc>,
    /// Last parsed `xcodebuild` result, replaced atomically on each
    /// `/api/v1/builds/parse` submission (spec §3: "at most one current
    /// result").
    pub last_build: Arc<Mutex<Option<BuildResult>>>,
}

/// Build the full router. `/health` is excluded from the auth layer so a
/// liveness probe never needs the key.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/server/status", get(server_routes::status))
        .route("/api/v1/server/logs", get(server_routes::logs))
        .route("/api/v1/logs", get(logs::query))
        .route("/api/v1/logs/stream", get(sse::stream_logs))
        .route("/api/v1/logs/summary", get(logs::summary))
        .route("/api/v1/logs/errors", get(logs::errors))
        .route("/api/v1/logs/sources", get(logs::sources))
        .route("/api/v1/logs/filter", post(logs::filter))
        .route("/api/v1/logs/wait", get(longpoll::wait_for_log))
        .route("/api/v1/builds/parse", post(builds::parse))
        .route("/api/v1/builds/latest", get(builds::latest))
        .route("/api/v1/crashes/latest", get(crashes::latest))
        .route("/api/v1/proxy/flows", get(proxy_routes::query_flows))
        .route("/api/v1/proxy/flows/:id", get(proxy_routes::get_flow))
        .route("/api/v1/proxy/flows/wait", get(proxy_routes::wait_for_flow))
        .route("/api/v1/proxy/flows/summary", get(proxy_routes::summary))
        .route("/api/v1/proxy/start", post(proxy_routes::start))
        .route("/api/v1/proxy/stop", post(proxy_routes::stop))
        .route(
            "/api/v1/proxy/intercepts",
            get(proxy_routes::list_intercepts).post(proxy_routes::add_intercept),
        )
        .route("/api/v1/proxy/intercepts/:id", axum::routing::delete(proxy_routes::remove_intercept))
        .route("/api/v1/proxy/held", get(proxy_routes::list_held))
        .route("/api/v1/proxy/held/:flow_id/release", post(proxy_routes::release_held))
        .route("/api/v1/proxy/flows/:id/replay", post(proxy_routes::replay_flow))
        .route(
            "/api/v1/proxy/mocks",
            get(proxy_routes::list_mocks).post(proxy_routes::add_mock),
        )
        .route(
            "/api/v1/proxy/mocks/:id",
            patch(proxy_routes::update_mock).delete(proxy_routes::remove_mock),
        )
        .route("/api/v1/devices", get(devices_routes::pool))
        .route("/api/v1/devices/:udid/claim", post(devices_routes::claim))
        .route("/api/v1/devices/:udid/release", post(devices_routes::release))
        .route("/api/v1/devices/cleanup", post(devices_routes::cleanup))
        .route("/api/v1/devices/:udid/refresh", post(devices_routes::refresh))
        .route("/api/v1/devices/resolve/:selector", get(devices_routes::resolve))
        .route("/api/v1/devices/ensure", post(devices_routes::ensure))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/proxy/internal/flow", post(crate::proxy::ingest::complete))
        .route("/api/v1/proxy/internal/check", post(crate::proxy::ingest::check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds_without_panicking() {
        // Smoke test: constructing the AppState and router shouldn't
        // panic even with empty/default collaborators. Most endpoint
        // behavior is covered in the collaborators' own unit tests.
        let config = Arc::new(Config::default());
        let ring = Arc::new(Ring::new(10));
        let pipeline = Pipeline::new(ring.clone(), std::time::Duration::from_secs(30));
        let supervisor = Arc::new(Supervisor::new(pipeline.clone(), Default::default()));
        let flows = Arc::new(FlowStore::new(10));
        let intercepts = Arc::new(InterceptRegistry::new(std::time::Duration::from_secs(30)));
        let mocks = Arc::new(MockRegistry::new());
        let addon = Arc::new(
            MitmproxyAddon::new(&std::env::temp_dir().join("quern-test-secret"), 9199).unwrap(),
        );
        let devices = Arc::new(DevicePool::new(
            std::env::temp_dir().join("quern-test-devices.json"),
            Box::new(crate::devices::StubScanner),
        ));
        let state = AppState {
            config,
            ring,
            pipeline,
            supervisor,
            flows,
            intercepts,
            mocks,
            addon,
            devices,
            log_buffer: LogBuffer::new(),
            api_key: Arc::new("test-key".to_string()),
            start_time: Utc::now(),
            last_build: Arc::new(Mutex::new(None)),
        };
        let _router = build_router(state);
    }
}
