//! Typed HTTP error taxonomy with a render/report boundary.
//!
//! [`AppError`] is the one error type handlers return. It pairs an
//! [`ErrorKind`] (which fixes the HTTP status and the user-facing message)
//! with the internal diagnostic payload: raw message, numeric code, a
//! generated error id, capture location, stack trace, and an optional wrapped
//! cause.
//!
//! Rendering and reporting are deliberately separate surfaces:
//!
//! - **Render** ([`IntoResponse`]): the fixed status plus an HTML page showing
//!   only the user message and the error id. Raw messages and stack traces
//!   never reach the client.
//! - **Report**: the full diagnostic payload rides along in the response
//!   extensions as a [`CapturedError`]; the classifier middleware picks it up
//!   and persists it best-effort.
//!
//! Every handler that can fail returns `Result<T, AppError>` and propagates
//! with `?` — the blanket [`From`] converts anything `Into<anyhow::Error>`
//! into the generic `App` kind, preserving message and cause.

use std::panic::Location;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

/// Marker extension: this response is framework-native and must not be
/// rewritten by the error classifier. Set on rate-limit aborts and on
/// validation/auth responses that carry their own body.
#[derive(Clone, Copy, Debug)]
pub struct Passthrough;

/// The error taxonomy. Each named variant fixes a status code and a user
/// message; `Http` carries any unmapped status; `App` is the catch-all for
/// wrapped non-HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    /// Renders as 404: denied resources are indistinguishable from missing
    /// ones to the outside.
    AccessDenied,
    NotFound,
    SessionExpired,
    UnprocessableEntity,
    TooManyRequests,
    MethodNotAllowed,
    InternalServerError,
    ServiceUnavailable,
    GatewayTimeout,
    /// Any HTTP status without a dedicated variant.
    Http(u16),
    /// Non-HTTP application failure.
    App,
}

impl ErrorKind {
    /// Total mapping from status code to kind. Unmapped codes fall to
    /// [`ErrorKind::Http`], so classification never fails.
    pub fn from_status(code: u16) -> Self {
        match code {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            403 => Self::AccessDenied,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            419 => Self::SessionExpired,
            422 => Self::UnprocessableEntity,
            429 => Self::TooManyRequests,
            500 => Self::InternalServerError,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            other => Self::Http(other),
        }
    }

    /// The status this kind renders with. Note the 403 → 404 remap on
    /// `AccessDenied`.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AccessDenied | Self::NotFound => StatusCode::NOT_FOUND,
            Self::SessionExpired => StatusCode::from_u16(419).expect("419 is a valid status"),
            Self::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InternalServerError | Self::App => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Http(code) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Fixed user-facing message. Never derived from the internal message.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "Invalid request. Check the submitted data and try again.",
            Self::Unauthorized => "Unauthorized access. Please sign in to continue.",
            // Same wording as NotFound on purpose.
            Self::AccessDenied | Self::NotFound => "The resource was not found.",
            Self::SessionExpired => {
                "Your session has expired. Please refresh the page and sign in again."
            }
            Self::UnprocessableEntity => {
                "The submitted data could not be processed. Check it and try again."
            }
            Self::TooManyRequests => "Too many requests. Please wait a moment and try again.",
            Self::MethodNotAllowed => "This action is not allowed on the requested resource.",
            Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Try again later."
            }
            Self::GatewayTimeout => {
                "The service is taking too long to respond. Try again later."
            }
            Self::Http(_) => "An error occurred while processing your request. Try again.",
            Self::InternalServerError | Self::App => {
                "An application error occurred. Try again."
            }
        }
    }

    /// Default internal message used when the thrower supplied none.
    fn default_message(&self) -> &'static str {
        match self {
            Self::BadRequest => "Bad request",
            Self::Unauthorized => "Unauthorized",
            Self::AccessDenied => "Access denied",
            Self::NotFound => "Resource not found",
            Self::SessionExpired => "Session expired",
            Self::UnprocessableEntity => "Unprocessable entity",
            Self::TooManyRequests => "Too many requests",
            Self::MethodNotAllowed => "Method not allowed",
            Self::InternalServerError => "Internal server error",
            Self::ServiceUnavailable => "Service unavailable",
            Self::GatewayTimeout => "Gateway timeout",
            Self::Http(_) => "Failed to process the request",
            Self::App => "Application error",
        }
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::GatewayTimeout)
    }

    /// Stable class name recorded in exception reports.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::AccessDenied => "AccessDenied",
            Self::NotFound => "NotFound",
            Self::SessionExpired => "SessionExpired",
            Self::UnprocessableEntity => "UnprocessableEntity",
            Self::TooManyRequests => "TooManyRequests",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::GatewayTimeout => "GatewayTimeout",
            Self::Http(_) => "Http",
            Self::App => "App",
        }
    }
}

/// A classified application error: kind + diagnostic payload.
#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    /// Raw internal message — logged and reported, never rendered.
    pub message: String,
    /// Free-form numeric code carried over from the failure site.
    pub code: i64,
    /// Minted once per instance; shown to the user and recorded in the report.
    pub error_id: Uuid,
    /// Source location of the construction site.
    pub file: &'static str,
    pub line: u32,
    /// Wrapped lower-level cause, if any.
    pub cause: Option<anyhow::Error>,
    stack_trace: String,
}

impl AppError {
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let caller = Location::caller();
        let message = message.into();
        let message = if message.is_empty() {
            kind.default_message().to_owned()
        } else {
            message
        };
        Self {
            kind,
            message,
            code: 0,
            error_id: Uuid::new_v4(),
            file: caller.file(),
            line: caller.line(),
            cause: None,
            stack_trace: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }

    /// Construct the variant matching `status`, with that kind's default
    /// internal message. Unmapped codes yield [`ErrorKind::Http`].
    #[track_caller]
    pub fn from_status(status: u16) -> Self {
        Self::new(ErrorKind::from_status(status), "")
    }

    /// Wrap an arbitrary failure into the generic `App` kind, preserving its
    /// message and keeping it as the cause.
    #[track_caller]
    pub fn wrap(err: anyhow::Error) -> Self {
        let mut this = Self::new(ErrorKind::App, err.to_string());
        this.cause = Some(err);
        this
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[track_caller]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalServerError, message)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    /// User message suffixed with the error id, the only internal detail the
    /// user ever sees.
    pub fn user_message(&self) -> String {
        format!("{} (Error: {})", self.kind.user_message(), self.error_id)
    }

    /// Snapshot of the diagnostic payload, suitable for response extensions.
    pub fn capture(&self) -> CapturedError {
        CapturedError {
            exception_class: self.kind.class_name().to_owned(),
            message: self.message.clone(),
            user_message: self.kind.user_message().to_owned(),
            file: self.file.to_owned(),
            line: self.line,
            code: self.code,
            status_code: self.status().as_u16(),
            error_id: self.error_id,
            is_retryable: self.kind.is_retryable(),
            stack_trace: self.stack_trace.clone(),
            previous: self.cause.as_ref().map(|cause| CapturedCause {
                class: "anyhow::Error".to_owned(),
                message: cause.to_string(),
                code: 0,
                // The chain debug output is the closest thing a type-erased
                // cause has to a stack trace.
                stack_trace: format!("{cause:?}"),
            }),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.kind.class_name(), self.error_id, self.message)
    }
}

/// Convert any `Into<anyhow::Error>` into the generic `App` kind.
///
/// This is what lets fallible handlers use `?` on io/serde/etc. errors —
/// the idiomatic axum pattern.
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    #[track_caller]
    fn from(e: E) -> Self {
        Self::wrap(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(
            error = %self,
            status = self.status().as_u16(),
            error_id = %self.error_id,
            "handler error"
        );

        let body = error_page(&self.user_message());
        let captured = self.capture();

        let mut response = (
            self.status(),
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response();
        response.extensions_mut().insert(captured);
        response
    }
}

/// Diagnostic snapshot of a rendered [`AppError`], carried in response
/// extensions for the reporter middleware. Plain owned data so the
/// `Extensions` clone bound holds.
#[derive(Clone, Debug)]
pub struct CapturedError {
    pub exception_class: String,
    pub message: String,
    pub user_message: String,
    pub file: String,
    pub line: u32,
    pub code: i64,
    pub status_code: u16,
    pub error_id: Uuid,
    pub is_retryable: bool,
    pub stack_trace: String,
    pub previous: Option<CapturedCause>,
}

/// Wrapped-cause detail mirrored into the `previous_*` report fields.
#[derive(Clone, Debug)]
pub struct CapturedCause {
    pub class: String,
    pub message: String,
    pub code: i64,
    pub stack_trace: String,
}

/// Minimal HTML error page: fixed message plus error id, nothing else.
fn error_page(message: &str) -> String {
    format!(
        "<!doctype html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>Error</title></head>\n\
         <body>\n<main>\n<h1>Something went wrong</h1>\n<p>{}</p>\n</main>\n</body>\n</html>\n",
        html_escape(message)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
