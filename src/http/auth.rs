//! Identity resolution middleware.
//!
//! Resolves `Authorization: Bearer <token>` against the identities configured
//! in `[[identities]]` and injects an [`AuthUser`] request extension on a
//! match. Requests without a token, or with an unknown one, pass through
//! anonymous — whether a route demands authentication is the route's call,
//! not this middleware's.
//!
//! Downstream consumers: the trace middleware (identity response header), the
//! locale resolver (user locale preference), the error classifier (acting
//! user in exception reports), and the protected handlers themselves.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

/// The authenticated user, when a bearer token matched.
///
/// Handlers read this with `Option<Extension<AuthUser>>`.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    /// Preferred locale from the identity config, if declared.
    pub locale: Option<String>,
}

/// Axum middleware: resolves the bearer token to an [`AuthUser`] extension.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !state.identity_map.is_empty() {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if let Some(user) = provided.and_then(|token| state.identity_map.get(token)) {
            req.extensions_mut().insert(user.clone());
        }
    }

    next.run(req).await
}
