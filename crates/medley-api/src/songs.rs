use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

#[derive(Deserialize, ToSchema)]
pub struct SongPayload {
    pub title: String,
    pub year: i32,
    pub genre: String,
    pub performer: String,
    pub duration: Option<i32>,
    pub album_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SongCreated {
    pub song_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub year: i32,
    pub genre: String,
    pub performer: String,
    pub duration: Option<i32>,
    pub album_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SongSummary {
    pub id: String,
    pub title: String,
    pub performer: String,
}

#[derive(Deserialize)]
pub struct SongFilter {
    pub title: Option<String>,
    pub performer: Option<String>,
}

fn validate_song_payload(payload: &SongPayload) -> ApiResult<()> {
    for (field, value) in [
        ("title", &payload.title),
        ("genre", &payload.genre),
        ("performer", &payload.performer),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("{field} must not be empty"),
            ));
        }
    }
    let current_year = chrono::Utc::now().year();
    if payload.year < 1900 || payload.year > current_year {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("year must be between 1900 and {current_year}"),
        ));
    }
    if let Some(duration) = payload.duration {
        if duration < 1 {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "duration must be 1 or greater",
            ));
        }
    }
    Ok(())
}

async fn ensure_album_exists(state: &AppState, album_id: &str) -> ApiResult<()> {
    let found = sqlx::query_scalar::<_, String>("SELECT id FROM albums WHERE id = $1")
        .bind(album_id)
        .fetch_optional(&state.pool)
        .await?;
    if found.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "album not found",
        ));
    }
    Ok(())
}

pub(crate) async fn create_song(
    State(state): State<AppState>,
    Json(payload): Json<SongPayload>,
) -> ApiResult<(StatusCode, Json<SongCreated>)> {
    validate_song_payload(&payload)?;
    if let Some(album_id) = &payload.album_id {
        ensure_album_exists(&state, album_id).await?;
    }

    let song_id = format!("song-{}", Uuid::new_v4());
    sqlx::query(
        "INSERT INTO songs (id, title, year, genre, performer, duration, album_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&song_id)
    .bind(payload.title.trim())
    .bind(payload.year)
    .bind(payload.genre.trim())
    .bind(payload.performer.trim())
    .bind(payload.duration)
    .bind(&payload.album_id)
    .execute(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(SongCreated { song_id })))
}

pub(crate) async fn list_songs(
    State(state): State<AppState>,
    Query(filter): Query<SongFilter>,
) -> ApiResult<Json<Vec<SongSummary>>> {
    // An absent filter becomes `%%`, which matches every non-null value.
    let title_pattern = format!("%{}%", filter.title.unwrap_or_default());
    let performer_pattern = format!("%{}%", filter.performer.unwrap_or_default());

    let rows = sqlx::query(
        "SELECT id, title, performer FROM songs \
         WHERE title ILIKE $1 AND performer ILIKE $2 ORDER BY title",
    )
    .bind(&title_pattern)
    .bind(&performer_pattern)
    .fetch_all(&state.pool)
    .await?;

    let mut songs = Vec::new();
    for row in rows {
        songs.push(SongSummary {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            performer: row.try_get("performer")?,
        });
    }

    Ok(Json(songs))
}

pub(crate) async fn get_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> ApiResult<Json<Song>> {
    let row = sqlx::query(
        "SELECT id, title, year, genre, performer, duration, album_id FROM songs WHERE id = $1",
    )
    .bind(&song_id)
    .fetch_optional(&state.pool)
    .await?;
    let Some(row) = row else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "song not found",
        ));
    };

    Ok(Json(Song {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        year: row.try_get("year")?,
        genre: row.try_get("genre")?,
        performer: row.try_get("performer")?,
        duration: row.try_get("duration")?,
        album_id: row.try_get("album_id")?,
    }))
}

pub(crate) async fn update_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    Json(payload): Json<SongPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    validate_song_payload(&payload)?;
    if let Some(album_id) = &payload.album_id {
        ensure_album_exists(&state, album_id).await?;
    }

    let result = sqlx::query(
        "UPDATE songs SET title = $1, year = $2, genre = $3, performer = $4, \
         duration = $5, album_id = $6 WHERE id = $7",
    )
    .bind(payload.title.trim())
    .bind(payload.year)
    .bind(payload.genre.trim())
    .bind(payload.performer.trim())
    .bind(payload.duration)
    .bind(&payload.album_id)
    .bind(&song_id)
    .execute(&state.pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "song not found",
        ));
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub(crate) async fn delete_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM songs WHERE id = $1")
        .bind(&song_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "song not found",
        ));
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_router;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn valid_payload() -> SongPayload {
        SongPayload {
            title: "Life in Technicolor".to_string(),
            year: 2008,
            genre: "Indie".to_string(),
            performer: "Coldplay".to_string(),
            duration: Some(120),
            album_id: None,
        }
    }

    #[test]
    fn payload_accepts_valid_input() {
        assert!(validate_song_payload(&valid_payload()).is_ok());
    }

    #[test]
    fn payload_rejects_blank_title() {
        let payload = SongPayload {
            title: "".to_string(),
            ..valid_payload()
        };
        assert!(validate_song_payload(&payload).is_err());
    }

    #[test]
    fn payload_rejects_zero_duration() {
        let payload = SongPayload {
            duration: Some(0),
            ..valid_payload()
        };
        assert!(validate_song_payload(&payload).is_err());
    }

    #[tokio::test]
    async fn create_song_rejects_invalid_json() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/songs")
                    .header("content-type", "application/json")
                    .body(Body::from("{invalid"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_song_rejects_missing_fields() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/songs")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title":"Solo"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        // Serde rejects the payload before the handler runs.
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
