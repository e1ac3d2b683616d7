use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use medley_core::metrics;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;

use crate::auth::require_user;
use crate::playlists::require_owned_playlist;
use crate::{ApiError, ApiResult, AppState, SERVICE_NAME};

pub(crate) const EXPORT_PLAYLISTS_QUEUE: &str = "export:playlists";

#[derive(Deserialize, ToSchema)]
pub struct ExportRequest {
    pub target_email: String,
}

fn validate_target_email(email: &str) -> ApiResult<()> {
    let trimmed = email.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "target_email must be a valid email address",
        ));
    }
    Ok(())
}

pub(crate) async fn export_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<ExportRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let user_id = require_user(&state, &headers)?;
    validate_target_email(&payload.target_email)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    let message = json!({
        "playlist_id": playlist_id,
        "target_email": payload.target_email.trim(),
    });

    match state
        .producer
        .publish(EXPORT_PLAYLISTS_QUEUE, message.to_string().as_bytes())
        .await
    {
        Ok(()) => {
            metrics::inc_export_publish(SERVICE_NAME, metrics::EXPORT_RESULT_SUCCESS);
            Ok((StatusCode::CREATED, Json(json!({ "status": "queued" }))))
        }
        Err(err) => {
            metrics::inc_export_publish(SERVICE_NAME, metrics::EXPORT_RESULT_ERROR);
            error!(playlist_id = %playlist_id, error = %err, "export publish failed");
            Err(ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_ERROR",
                "export could not be queued",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{auth_header, test_router};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn email_validation_accepts_plausible_addresses() {
        assert!(validate_target_email("listener@example.com").is_ok());
    }

    #[test]
    fn email_validation_rejects_blank_and_missing_at() {
        assert!(validate_target_email("   ").is_err());
        assert!(validate_target_email("not-an-email").is_err());
    }

    #[tokio::test]
    async fn export_requires_bearer_token() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/export/playlists/playlist-1")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target_email":"listener@example.com"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn export_rejects_invalid_email() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/export/playlists/playlist-1")
                    .header("authorization", auth_header("user-1"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target_email":"not-an-email"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
