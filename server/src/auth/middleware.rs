//! Authentication Middleware
//!
//! The channel endpoints are service-to-service: callers present the
//! process-wide bearer token from configuration. Tenant identity travels in
//! request bodies and paths; end-user auth lives in the surrounding product.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use super::error::AuthError;
use crate::api::AppState;
use crate::webhook::verify::constant_time_eq;

/// Middleware to require the service bearer token.
///
/// # Usage
///
/// Apply to routes that require authentication:
/// ```ignore
/// Router::new()
///     .route("/send", post(handler))
///     .layer(axum::middleware::from_fn_with_state(state, require_service_auth))
/// ```
pub async fn require_service_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?;

    if !constant_time_eq(token, &state.config.api_token) {
        return Err(AuthError::InvalidToken);
    }

    Ok(next.run(request).await)
}
