//! Public status endpoint (`GET /status`).
//!
//! Safe to expose without authentication: liveness plus aggregate error
//! counts only. What this endpoint **does not** include:
//!
//! - individual error messages or stack traces
//! - rate-limit configuration or counter values
//! - host identity or build internals beyond the version header every
//!   response already carries
//!
//! Operators who need detail use `/ops/reports` behind the ops token.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// `GET /healthz` — liveness only, no state touched. Wired up as the Docker
/// HEALTHCHECK target via the `--healthcheck` subcommand.
pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /status` — public liveness and aggregate error metrics.
///
/// Example response:
/// ```json
/// {
///   "status": "ok",
///   "uptime_secs": 3600,
///   "errors": { "total": 12, "retryable": 2 }
/// }
/// ```
pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let stats = state.reports.stats().await;

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime_secs,
        "errors": {
            "total": stats.total,
            "retryable": stats.retryable,
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use crate::{config::Config, reports::tests::make_report, state::AppState};

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/healthz", get(super::healthz))
            .route("/status", get(super::status))
            .with_state(state)
    }

    #[tokio::test]
    async fn healthz_returns_200_ok() {
        let state = Arc::new(AppState::new(Arc::new(Config::default())));
        let resp = app(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn fresh_state_reports_zero_errors() {
        let state = Arc::new(AppState::new(Arc::new(Config::default())));
        let resp = app(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["errors"]["total"], 0);
    }

    #[tokio::test]
    async fn status_counts_recorded_reports_without_leaking_detail() {
        let state = Arc::new(AppState::new(Arc::new(Config::default())));
        state.reports.record(make_report("NotFound", 404)).unwrap();
        state.reports.record(make_report("App", 500)).unwrap();

        let resp = app(state)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["errors"]["total"], 2);

        let body = json.to_string();
        assert!(!body.contains("internal detail"), "raw messages must not appear");
        assert!(!body.contains("stack"), "stack traces must not appear");
    }
}
