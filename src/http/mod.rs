//! HTTP surface: the middleware pipeline and the handler routes.
//!
//! Layer order, outermost first:
//!
//! 1. `terminate` — observes every final response, drives the counter
//!    increments and the `ResponseObserved` event
//! 2. `auth` — resolves the bearer token to an identity
//! 3. `locale` — resolves the request locale (may use the identity)
//! 4. `trace` — assigns trace/request ids before anything that logs or reports
//! 5. `errors` — classifies error responses and reports them
//! 6. `rate_limit` — pre-check; aborts over-limit requests before the handler
//!
//! The ordering invariants this encodes: the pre-check always precedes the
//! handler; the terminating observer sees every response exactly once,
//! including rate-limit aborts and rendered error pages; trace ids exist
//! before any reporting happens.

pub mod auth;
pub mod errors;
pub mod locale;
pub mod ops;
pub mod profile;
pub mod rate_limit;
pub mod status;
pub mod terminate;
pub mod trace;

use std::{sync::Arc, time::Duration};

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::state::AppState;

/// Build the application router with the full middleware pipeline applied.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(status::healthz))
        .route("/status", get(status::status))
        .route("/profile", get(profile::show))
        .route("/profile", put(profile::update))
        .route("/profile/boom", get(profile::boom))
        .route("/profile/upstream", get(profile::upstream))
        .merge(ops::router(Arc::clone(&state)))
        // Layers run top-down for a request, so the last .layer() added is
        // outermost. Listed here innermost first.
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            errors::classify_errors_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            locale::locale_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            terminate::terminate_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
