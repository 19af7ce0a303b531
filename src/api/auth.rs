//! `Authorization: Bearer <key>` or `X-API-Key: <key>` check, applied to
//! every route except `/health` via `route_layer` in `build_router`.

use super::AppState;
use crate::error::AppError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

pub async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            req.headers()
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        });

    match presented {
        Some(key) if key == *state.api_key => Ok(next.run(req).await),
        _ => Err(AppError::AuthRequired),
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn bearer_prefix_is_stripped() {
        let header = "Bearer abc123";
        assert_eq!(header.strip_prefix("Bearer "), Some("abc123"));
    }
}
