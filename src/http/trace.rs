//! Trace context middleware.
//!
//! Every request gets two correlation ids:
//!
//! - `trace_id` — minted once per session and reused for its lifetime, so all
//!   requests from one client session share it
//! - `request_id` — fresh UUID v4 on every request
//!
//! Both are stored as a [`TraceContext`] extension, wrapped in a [`tracing`]
//! span so every log line for the request carries them, and echoed back as
//! `X-Trace-ID` / `X-Request-ID` response headers along with `X-App-Version`
//! and, for authenticated requests, the `X-ID` identity header.
//!
//! Layer order matters: apply this middleware **outside** anything that logs
//! or reports, so downstream log lines and exception reports carry the ids.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument as _;
use uuid::Uuid;

use crate::{http::auth::AuthUser, session::SessionStore, state::AppState};

/// Correlation ids for the current request.
///
/// Exposed as an axum extension so any handler or inner middleware can read
/// it:
/// ```rust,ignore
/// async fn handler(Extension(trace): Extension<TraceContext>) { ... }
/// ```
#[derive(Clone, Copy, Debug)]
pub struct TraceContext {
    /// Stable across the session.
    pub trace_id: Uuid,
    /// Regenerated every request.
    pub request_id: Uuid,
}

/// Axum middleware that assigns a [`TraceContext`] to every request.
pub async fn trace_context_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let cookie = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    let (session_id, session, created) = state.sessions.resolve(cookie);

    let trace = TraceContext {
        trace_id: session.trace_id,
        request_id: Uuid::new_v4(),
    };
    req.extensions_mut().insert(trace);

    // The auth middleware runs outside this one, so the identity (if any) is
    // already on the request.
    let user_id = req.extensions().get::<AuthUser>().map(|u| u.id);

    let span = tracing::info_span!(
        "request",
        trace_id = %trace.trace_id,
        request_id = %trace.request_id,
    );
    let mut response = next.run(req).instrument(span).await;

    let headers = response.headers_mut();
    set_header(headers, "x-trace-id", &trace.trace_id.to_string());
    set_header(headers, "x-request-id", &trace.request_id.to_string());
    set_header(headers, "x-app-version", &state.config.app.version);
    if let Some(id) = user_id {
        set_header(headers, "x-id", &id.to_string());
    }

    if created {
        if let Ok(value) = HeaderValue::from_str(&SessionStore::cookie_value(session_id)) {
            headers.append(header::SET_COOKIE, value);
        }
    }

    response
}

fn set_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
