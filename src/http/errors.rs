//! Exception classification and reporting middleware.
//!
//! Sits just outside the routes. On the way out it looks at every error
//! response (status ≥ 400) and applies the translation contract:
//!
//! - responses already rendered from an [`AppError`] (they carry a
//!   [`CapturedError`] extension) are kept as-is,
//! - responses marked [`Passthrough`] — rate-limit aborts, validation and
//!   auth bodies that must keep their native shape — are kept as-is,
//! - anything else (router 404/405 fallbacks, bare status codes from
//!   handlers) is translated through [`ErrorKind::from_status`] and
//!   re-rendered as the matching error page. Translation is total; rendering
//!   never fails to produce a response.
//!
//! Every rendered error is then reported: the captured diagnostic payload is
//! joined with the trace context, the acting user, and the request metadata
//! into an [`ExceptionReport`] and appended to the report log. Recording is
//! best-effort by contract — the `Result` is ignored beyond a debug log, so a
//! reporting failure can never become a second failure during error handling.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::{
    error::{AppError, CapturedError, Passthrough},
    http::{auth::AuthUser, rate_limit::client_ip, trace::TraceContext},
    reports::ExceptionReport,
    state::AppState,
};

/// Request metadata snapshotted before the handler runs, for the report
/// context blob.
#[derive(Clone, Debug)]
struct RequestMeta {
    method: String,
    uri: String,
    ip: String,
    user_agent: Option<String>,
    full_url: String,
}

impl RequestMeta {
    fn capture(req: &Request) -> Self {
        let uri = req.uri().to_string();
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost");
        Self {
            method: req.method().to_string(),
            uri: uri.clone(),
            ip: client_ip(req).to_string(),
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            full_url: format!("http://{host}{uri}"),
        }
    }
}

/// Axum middleware: translate unclassified error responses, report all
/// classified ones.
pub async fn classify_errors_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let meta = RequestMeta::capture(&req);
    let trace = req.extensions().get::<TraceContext>().copied();
    let user = req.extensions().get::<AuthUser>().cloned();

    let mut response = next.run(req).await;

    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    if response.extensions().get::<Passthrough>().is_some() {
        return response;
    }

    if response.extensions().get::<CapturedError>().is_none() {
        // Framework-produced error status: translate to the matching variant
        // and render its page.
        response = AppError::from_status(status.as_u16()).into_response();
    }

    if let Some(captured) = response.extensions().get::<CapturedError>().cloned() {
        let report = build_report(&state, captured, trace, user.as_ref(), &meta);
        // Best-effort by contract; a dropped report is a debug note, not a failure.
        if let Err(reason) = state.reports.record(report) {
            tracing::debug!(%reason, "exception report dropped");
        }
    }

    response
}

fn build_report(
    state: &AppState,
    captured: CapturedError,
    trace: Option<TraceContext>,
    user: Option<&AuthUser>,
    meta: &RequestMeta,
) -> ExceptionReport {
    let context = serde_json::json!({
        "request": {
            "method": meta.method,
            "uri": meta.uri,
            "ip": meta.ip,
            "user_agent": meta.user_agent,
            "full_url": meta.full_url,
        },
        "status_code": captured.status_code,
        "error_id": captured.error_id,
        "correlation_id": trace.map(|t| t.trace_id),
        "request_id": trace.map(|t| t.request_id),
        "user": {
            "id": user.map(|u| u.id),
            "name": user.map(|u| u.name.clone()),
            "email": user.map(|u| u.email.clone()),
        },
    });

    let app = &state.config.app;
    ExceptionReport {
        created_at: Utc::now(),
        exception_class: captured.exception_class,
        message: captured.message,
        user_message: captured.user_message,
        file: captured.file,
        line: captured.line,
        code: captured.code,
        status_code: captured.status_code,
        error_id: captured.error_id,
        correlation_id: trace.map(|t| t.trace_id),
        request_id: trace.map(|t| t.request_id),
        app_version: app.version.clone(),
        app_commit: app.commit.clone(),
        app_build_date: app.build_date.clone(),
        app_role: app.role.clone(),
        host_name: state.host_name.clone(),
        host_ip: state.host_ip.clone(),
        user_id: user.map(|u| u.id),
        is_retryable: captured.is_retryable,
        stack_trace: captured.stack_trace,
        context,
        previous_exception_class: captured.previous.as_ref().map(|p| p.class.clone()),
        previous_message: captured.previous.as_ref().map(|p| p.message.clone()),
        previous_code: captured.previous.as_ref().map(|p| p.code),
        previous_stack_trace: captured.previous.map(|p| p.stack_trace),
    }
}
