//! Locale resolution middleware.
//!
//! Resolution order: the authenticated user's preferred locale, then the
//! first parseable `Accept-Language` tag, then the configured default. The
//! result is exposed as a [`Locale`] extension for anything downstream that
//! formats user-visible text or dates.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::{http::auth::AuthUser, state::AppState};

/// The active locale for this request, e.g. `en` or `pt-BR`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locale(pub String);

/// Axum middleware that resolves and attaches the request [`Locale`].
pub async fn locale_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let user_locale = req
        .extensions()
        .get::<AuthUser>()
        .and_then(|user| user.locale.clone());

    let locale = user_locale
        .or_else(|| {
            req.headers()
                .get(header::ACCEPT_LANGUAGE)
                .and_then(|v| v.to_str().ok())
                .and_then(first_language_tag)
        })
        .unwrap_or_else(|| state.config.app.default_locale.clone());

    req.extensions_mut().insert(Locale(locale));
    next.run(req).await
}

/// Extract the first language tag from an `Accept-Language` value.
///
/// Quality weights are ignored beyond ordering — browsers already send tags
/// in preference order. Returns `None` for empty or malformed values.
fn first_language_tag(value: &str) -> Option<String> {
    value
        .split(',')
        .map(|tag| tag.split(';').next().unwrap_or("").trim())
        .find(|tag| !tag.is_empty() && *tag != "*" && is_language_tag(tag))
        .map(str::to_owned)
}

fn is_language_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= 35
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::Request,
        middleware,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    use crate::{config::Config, http::auth::AuthUser, state::AppState};

    use super::{first_language_tag, Locale};

    async fn echo_locale(Extension(Locale(locale)): Extension<Locale>) -> String {
        locale
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/", get(echo_locale))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                super::locale_middleware,
            ))
            .with_state(state)
    }

    fn default_state() -> Arc<AppState> {
        Arc::new(AppState::new(Arc::new(Config::default())))
    }

    async fn body_of(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), 256).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // -----------------------------------------------------------------------
    // Resolution order
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn accept_language_header_wins_for_anonymous_requests() {
        let resp = app(default_state())
            .oneshot(
                Request::get("/")
                    .header("accept-language", "pt-BR,pt;q=0.9,en;q=0.8")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_of(resp).await, "pt-BR");
    }

    #[tokio::test]
    async fn user_preference_beats_accept_language() {
        let state = default_state();
        let app = Router::new()
            .route("/", get(echo_locale))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                super::locale_middleware,
            ))
            // Simulate the auth middleware having run first.
            .layer(middleware::from_fn(|mut req: Request<Body>, next: axum::middleware::Next| async move {
                req.extensions_mut().insert(AuthUser {
                    id: 1,
                    name: "Alice".into(),
                    email: "alice@example.com".into(),
                    locale: Some("fr".into()),
                });
                next.run(req).await
            }))
            .with_state(state);

        let resp = app
            .oneshot(
                Request::get("/")
                    .header("accept-language", "pt-BR")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_of(resp).await, "fr");
    }

    #[tokio::test]
    async fn missing_header_falls_back_to_configured_default() {
        let resp = app(default_state())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_of(resp).await, "en");
    }

    #[tokio::test]
    async fn garbage_header_falls_back_to_configured_default() {
        let resp = app(default_state())
            .oneshot(
                Request::get("/")
                    .header("accept-language", ";;;,, *")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_of(resp).await, "en");
    }

    // -----------------------------------------------------------------------
    // Header parsing
    // -----------------------------------------------------------------------

    #[test]
    fn first_tag_is_taken_with_weights_stripped() {
        assert_eq!(first_language_tag("en-US,en;q=0.5"), Some("en-US".into()));
        assert_eq!(first_language_tag("de"), Some("de".into()));
    }

    #[test]
    fn wildcard_and_empty_tags_are_skipped() {
        assert_eq!(first_language_tag("*, fr"), Some("fr".into()));
        assert_eq!(first_language_tag("*"), None);
        assert_eq!(first_language_tag(""), None);
    }
}
