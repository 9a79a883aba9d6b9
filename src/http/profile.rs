//! Minimal authenticated profile resource.
//!
//! This is intentionally a thin surface: it exists to exercise the pipeline —
//! identity on the happy path, the typed 401 when anonymous, framework-native
//! validation on `PUT`, and a deliberate failure route driving the wrap path.
//! There is no persistence behind it.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, ErrorKind, Passthrough},
    http::{auth::AuthUser, locale::Locale},
};

/// `GET /profile` — the authenticated user's own record.
pub async fn show(
    user: Option<Extension<AuthUser>>,
    locale: Option<Extension<Locale>>,
) -> Result<impl IntoResponse, AppError> {
    let Extension(user) = user.ok_or_else(|| AppError::unauthorized(""))?;
    Ok(Json(json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "locale": locale.map(|Extension(Locale(l))| l),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// `PUT /profile` — update name/email.
///
/// Validation failures return the framework-native 422 field-error shape,
/// marked passthrough so the error classifier leaves the body alone.
pub async fn update(
    user: Option<Extension<AuthUser>>,
    Json(body): Json<UpdateProfile>,
) -> Result<Response, AppError> {
    let Extension(user) = user.ok_or_else(|| AppError::unauthorized(""))?;

    if let Some(rejection) = validate(&body) {
        return Ok(rejection);
    }

    Ok(Json(json!({
        "id": user.id,
        "name": body.name,
        "email": body.email,
    }))
    .into_response())
}

fn validate(body: &UpdateProfile) -> Option<Response> {
    let mut errors = serde_json::Map::new();
    if body.name.trim().is_empty() {
        errors.insert("name".into(), json!(["The name field is required."]));
    } else if body.name.len() > 255 {
        errors.insert(
            "name".into(),
            json!(["The name may not be greater than 255 characters."]),
        );
    }
    if body.email.trim().is_empty() {
        errors.insert("email".into(), json!(["The email field is required."]));
    } else if !body.email.contains('@') {
        errors.insert("email".into(), json!(["The email must be a valid address."]));
    }

    if errors.is_empty() {
        return None;
    }

    let mut response = (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "message": "The given data was invalid.",
            "errors": errors,
        })),
    )
        .into_response();
    response.extensions_mut().insert(Passthrough);
    Some(response)
}

/// `GET /profile/boom` — deliberate failure, wrapped through the generic
/// error path. Exists so a deploy can verify classification and reporting
/// end to end.
pub async fn boom() -> Result<&'static str, AppError> {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "synthetic failure for testing");
    Err(io)?
}

/// `GET /profile/upstream` — deliberate typed transient failure, driving the
/// retryable render/report path the same way `boom` drives the wrap path.
pub async fn upstream() -> Result<&'static str, AppError> {
    Err(AppError::new(
        ErrorKind::GatewayTimeout,
        "synthetic upstream stall for testing",
    ))
}
