//! Operator-facing introspection endpoints.
//!
//! `/ops/reports` exposes the buffered exception reports. When
//! `server.ops_token_env` is configured, every ops route requires a matching
//! `Authorization: Bearer <token>` header; requests with a missing or wrong
//! token get `401 Unauthorized`, marked passthrough so the error classifier
//! neither rewrites nor reports them. When the env var is absent, ops auth is
//! disabled — acceptable only when the port is strictly firewalled.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::{error::Passthrough, state::AppState};

/// Build the `/ops` sub-router with its auth layer applied.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ops/reports", get(reports))
        .route("/ops/stats", get(stats))
        .layer(middleware::from_fn_with_state(state, ops_auth_middleware))
}

/// Axum middleware: requires a valid `Authorization: Bearer <token>` header
/// on every ops route when `state.ops_token` is set.
pub async fn ops_auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.ops_token else {
        // Auth disabled — pass through.
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected.as_str() => next.run(req).await,
        _ => {
            let mut response = (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer realm=\"tracegate ops\"")],
                "Ops API requires Authorization: Bearer <token>.",
            )
                .into_response();
            // Native auth rejection: keep the body, skip the error page.
            response.extensions_mut().insert(Passthrough);
            response
        }
    }
}

#[derive(Deserialize)]
pub struct ReportsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /ops/reports?limit=N` — recent exception reports, newest first.
pub async fn reports(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReportsQuery>,
) -> impl IntoResponse {
    let reports = state.reports.recent(query.limit.min(500)).await;
    Json(json!({ "count": reports.len(), "reports": reports }))
}

/// `GET /ops/stats` — aggregate report counts by status.
pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.reports.stats().await)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    use crate::{config::Config, reports::tests::make_report};

    use super::*;

    fn state(token: Option<&str>) -> Arc<AppState> {
        let mut state = AppState::new(Arc::new(Config::default()));
        state.ops_token = token.map(str::to_owned);
        Arc::new(state)
    }

    fn app(state: Arc<AppState>) -> Router {
        router(state.clone()).with_state(state)
    }

    #[tokio::test]
    async fn reports_endpoint_returns_buffered_reports() {
        let state = state(None);
        state.reports.record(make_report("NotFound", 404)).unwrap();

        let resp = app(state)
            .oneshot(HttpRequest::get("/ops/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["reports"][0]["exception_class"], "NotFound");
    }

    #[tokio::test]
    async fn limit_query_caps_results() {
        let state = state(None);
        for _ in 0..5 {
            state.reports.record(make_report("App", 500)).unwrap();
        }

        let resp = app(state)
            .oneshot(
                HttpRequest::get("/ops/reports?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["count"], 2);
    }

    #[tokio::test]
    async fn missing_token_is_rejected_when_configured() {
        let resp = app(state(Some("ops-secret")))
            .oneshot(HttpRequest::get("/ops/reports").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.extensions().get::<Passthrough>().is_some());
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let resp = app(state(Some("ops-secret")))
            .oneshot(
                HttpRequest::get("/ops/reports")
                    .header("authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_token_is_accepted() {
        let resp = app(state(Some("ops-secret")))
            .oneshot(
                HttpRequest::get("/ops/stats")
                    .header("authorization", "Bearer ops-secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
