//! Terminating middleware — the post-response half of the pipeline.
//!
//! Runs outermost among the app middleware, so it observes the final response
//! for every request exactly once: rate-limit aborts, rendered error pages,
//! and plain successes alike. It never alters the response; it only
//!
//! - classifies the response (`json` / `html` / `unknown`) and logs the
//!   content type, status, and declared size,
//! - increments the appropriate rate-limit counter — `errors` for status
//!   ≥ 400, `requests` otherwise — which is what eventually trips the
//!   pre-check in [`super::rate_limit`],
//! - publishes a [`ResponseObserved`][crate::events::AppEvent] event.
//!
//! Nothing in here can fail; an observation problem must never affect a
//! response that is already on its way out.

use std::{net::IpAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::{
    events::AppEvent,
    http::rate_limit::{client_ip, counter_key, Scope},
    state::AppState,
};

/// Axum middleware observing every terminated response.
pub async fn terminate_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let method = req.method().to_string();
    let uri = req.uri().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let response_type = classify(content_type.as_deref());
    let size = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    tracing::info!(
        status,
        response_type,
        content_type = content_type.as_deref().unwrap_or("-"),
        size = size.unwrap_or(0),
        "response"
    );

    let scope = if status >= 400 {
        Scope::Errors
    } else {
        Scope::Requests
    };
    hit(&state, scope, ip);

    state.events.publish(AppEvent::ResponseObserved {
        method,
        uri,
        status,
        response_type,
        content_type,
        size,
    });

    response
}

/// Record one attempt on `scope`'s counter for `ip`, using that scope's
/// decay window. No-op when the scope is disabled.
fn hit(state: &AppState, scope: Scope, ip: IpAddr) {
    let config = scope.config(state);
    if !config.enabled {
        return;
    }
    state.limiter.increment(
        &counter_key(config, ip),
        Duration::from_secs(config.decay_seconds),
    );
}

/// Response classification by content type.
fn classify(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => "json",
        Some(ct) if ct.starts_with("text/html") => "html",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use axum::{
        body::Body,
        extract::ConnectInfo,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use tower::ServiceExt;

    use crate::config::Config;

    use super::*;

    fn default_state() -> Arc<AppState> {
        Arc::new(AppState::new(Arc::new(Config::default())))
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ok", get(|| async { Json(serde_json::json!({"ok": true})) }))
            .route(
                "/fail",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
            )
            .layer(middleware::from_fn_with_state(
                state.clone(),
                terminate_middleware,
            ))
            .with_state(state)
    }

    fn request(path: &str, addr: IpAddr) -> HttpRequest<Body> {
        let mut req = HttpRequest::get(path).body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(addr, 40000)));
        req
    }

    fn attempts(state: &AppState, scope: Scope, ip: IpAddr) -> u64 {
        state
            .limiter
            .attempts(&counter_key(scope.config(state), ip))
    }

    // -----------------------------------------------------------------------
    // Counter increments
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn success_increments_requests_counter_only() {
        let state = default_state();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 1));

        let resp = app(state.clone()).oneshot(request("/ok", ip)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(attempts(&state, Scope::Requests, ip), 1);
        assert_eq!(attempts(&state, Scope::Errors, ip), 0);
    }

    #[tokio::test]
    async fn error_status_increments_errors_counter_only() {
        let state = default_state();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 2));

        let resp = app(state.clone()).oneshot(request("/fail", ip)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(attempts(&state, Scope::Requests, ip), 0);
        assert_eq!(attempts(&state, Scope::Errors, ip), 1);
    }

    #[tokio::test]
    async fn counters_are_mutually_exclusive_per_request() {
        let state = default_state();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 3));

        let _ = app(state.clone()).oneshot(request("/ok", ip)).await.unwrap();
        let _ = app(state.clone()).oneshot(request("/fail", ip)).await.unwrap();
        let _ = app(state.clone()).oneshot(request("/ok", ip)).await.unwrap();

        assert_eq!(attempts(&state, Scope::Requests, ip), 2);
        assert_eq!(attempts(&state, Scope::Errors, ip), 1);
    }

    #[tokio::test]
    async fn disabled_scope_is_not_incremented() {
        let mut config = Config::default();
        config.rate_limiting.errors.enabled = false;
        let state = Arc::new(AppState::new(Arc::new(config)));
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 4));

        let _ = app(state.clone()).oneshot(request("/fail", ip)).await.unwrap();
        assert_eq!(attempts(&state, Scope::Errors, ip), 0);
    }

    // -----------------------------------------------------------------------
    // Observation event
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn response_observed_event_is_published() {
        let state = default_state();
        let mut rx = state.events.subscribe();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 0, 5));

        let _ = app(state.clone()).oneshot(request("/ok", ip)).await.unwrap();

        match rx.try_recv().unwrap() {
            AppEvent::ResponseObserved {
                method,
                uri,
                status,
                response_type,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(uri, "/ok");
                assert_eq!(status, 200);
                assert_eq!(response_type, "json");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[test]
    fn classify_covers_the_three_buckets() {
        assert_eq!(classify(Some("application/json")), "json");
        assert_eq!(classify(Some("application/json; charset=utf-8")), "json");
        assert_eq!(classify(Some("text/html; charset=utf-8")), "html");
        assert_eq!(classify(Some("text/plain")), "unknown");
        assert_eq!(classify(None), "unknown");
    }
}
