use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};

use crate::{ApiError, ApiResult, AppState};

/// Resolves the calling user from the `Authorization: Bearer` header.
/// Token issuance is out of scope here; any HS256 token from the
/// configured issuer is accepted and its `sub` claim is the user id.
pub(crate) fn require_user(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "missing bearer token",
        ));
    };

    let value = value.to_str().map_err(|_| {
        ApiError::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "malformed authorization header",
        )
    })?;

    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "authorization header is not a bearer token",
        ));
    };

    let claims = medley_core::auth::verify_token(token, &state.jwt).map_err(|_| {
        ApiError::new(StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", "invalid token")
    })?;

    Ok(claims.sub)
}
