//! Dual-axis rate limiting middleware — the pre-check half.
//!
//! Two independent fixed windows per client IP: one counting all requests,
//! one counting error responses. This middleware only *checks* them; the
//! counters are incremented after the response by the terminating middleware
//! (see [`super::terminate`]), so an IP's error budget is driven purely by
//! the status codes it produces.
//!
//! On a breach the request is aborted immediately with that scope's
//! configured status and body — deliberately free of any detail about which
//! counter tripped — and a limit event is published, debounced to at most one
//! per suppression window per IP per scope. Requests under the limit clear
//! the scope's suppression flag so the next breach announces itself again.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    config::ScopeConfig,
    error::Passthrough,
    events::{AppEvent, LimitBreach},
    state::AppState,
};

/// Which counter a check or increment applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Requests,
    Errors,
}

impl Scope {
    pub fn config<'a>(&self, state: &'a AppState) -> &'a ScopeConfig {
        match self {
            Self::Requests => &state.config.rate_limiting.requests,
            Self::Errors => &state.config.rate_limiting.errors,
        }
    }

    fn event(&self, breach: LimitBreach) -> AppEvent {
        match self {
            Self::Requests => AppEvent::MaxRequestsLimit(breach),
            Self::Errors => AppEvent::MaxRequestErrorsLimit(breach),
        }
    }
}

/// Counter key for `scope`/`ip`: `{prefix}:{ip}`.
pub fn counter_key(config: &ScopeConfig, ip: IpAddr) -> String {
    format!("{}:{}", config.key, ip)
}

/// Suppression-flag key for `scope`/`ip`: `{prefix}:events:{ip}`.
fn event_key(config: &ScopeConfig, ip: IpAddr) -> String {
    format!("{}:events:{}", config.key, ip)
}

/// Read the peer address from extensions — set by
/// `into_make_service_with_connect_info`. Falls back to `127.0.0.1` if
/// unavailable (e.g., in tests).
pub fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|c| c.0.ip())
        .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

/// Axum middleware enforcing the pre-check for both scopes.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);

    for scope in [Scope::Requests, Scope::Errors] {
        if let Some(rejection) = check_scope(&state, scope, ip) {
            return rejection;
        }
    }

    next.run(req).await
}

/// Check one scope for `ip`. Returns the abort response on a breach.
fn check_scope(state: &AppState, scope: Scope, ip: IpAddr) -> Option<Response> {
    let config = scope.config(state);
    if !config.enabled {
        return None;
    }

    let counter_key = counter_key(config, ip);
    let event_key = event_key(config, ip);

    let attempts = state.limiter.attempts(&counter_key);
    if attempts >= config.max_events {
        if should_send_event(state, &event_key) {
            send_limit_event(state, scope, ip, attempts, &counter_key, &event_key);
        }
        return Some(reject(config));
    }

    // Under the limit: a future breach must emit a fresh event.
    state.limiter.forget_flag(&event_key);
    None
}

/// The debounce rule: emit when event-limiting is disabled, or when no
/// suppression flag is live for this scope/IP.
fn should_send_event(state: &AppState, event_key: &str) -> bool {
    if !state.config.rate_limiting.events.enabled {
        return true;
    }
    !state.limiter.has_flag(event_key)
}

fn send_limit_event(
    state: &AppState,
    scope: Scope,
    ip: IpAddr,
    attempts: u64,
    counter_key: &str,
    event_key: &str,
) {
    let config = scope.config(state);
    state.events.publish(scope.event(LimitBreach {
        ip: ip.to_string(),
        max_events: config.max_events,
        attempts,
        decay_seconds: config.decay_seconds,
        available_in: state.limiter.available_in(counter_key).as_secs(),
        return_code: config.return_code,
        return_message: config.return_message.clone(),
    }));

    let events = &state.config.rate_limiting.events;
    if events.enabled {
        state
            .limiter
            .put_flag(event_key, Duration::from_secs(events.decay_seconds));
    }
}

/// The abort response: configured status and body, nothing else. Marked
/// passthrough so the error classifier leaves it untouched.
fn reject(config: &ScopeConfig) -> Response {
    let status =
        StatusCode::from_u16(config.return_code).unwrap_or(StatusCode::NOT_FOUND);
    let mut response = (status, config.return_message.clone()).into_response();
    response.extensions_mut().insert(Passthrough);
    response
}
