use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{ApiError, ApiResult, AppState};

#[derive(Deserialize, ToSchema)]
pub struct AlbumPayload {
    pub name: String,
    pub year: i32,
}

#[derive(Serialize, ToSchema)]
pub struct AlbumCreated {
    pub album_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub year: i32,
    pub cover_url: Option<String>,
    pub songs: Vec<AlbumSong>,
}

#[derive(Serialize, ToSchema)]
pub struct AlbumSong {
    pub id: String,
    pub title: String,
    pub performer: String,
}

fn validate_album_payload(payload: &AlbumPayload) -> ApiResult<()> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "name must not be empty",
        ));
    }
    let current_year = chrono::Utc::now().year();
    if payload.year < 1900 || payload.year > current_year {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("year must be between 1900 and {current_year}"),
        ));
    }
    Ok(())
}

pub(crate) async fn create_album(
    State(state): State<AppState>,
    Json(payload): Json<AlbumPayload>,
) -> ApiResult<(StatusCode, Json<AlbumCreated>)> {
    validate_album_payload(&payload)?;

    let album_id = format!("album-{}", Uuid::new_v4());
    sqlx::query("INSERT INTO albums (id, name, year) VALUES ($1, $2, $3)")
        .bind(&album_id)
        .bind(payload.name.trim())
        .bind(payload.year)
        .execute(&state.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(AlbumCreated { album_id })))
}

pub(crate) async fn get_album(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> ApiResult<Json<Album>> {
    let row = sqlx::query("SELECT id, name, year, cover_url FROM albums WHERE id = $1")
        .bind(&album_id)
        .fetch_optional(&state.pool)
        .await?;
    let Some(row) = row else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "album not found",
        ));
    };

    let song_rows = sqlx::query(
        "SELECT id, title, performer FROM songs WHERE album_id = $1 ORDER BY title",
    )
    .bind(&album_id)
    .fetch_all(&state.pool)
    .await?;

    let mut songs = Vec::new();
    for song in song_rows {
        songs.push(AlbumSong {
            id: song.try_get("id")?,
            title: song.try_get("title")?,
            performer: song.try_get("performer")?,
        });
    }

    Ok(Json(Album {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        year: row.try_get("year")?,
        cover_url: row.try_get("cover_url")?,
        songs,
    }))
}

pub(crate) async fn update_album(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
    Json(payload): Json<AlbumPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    validate_album_payload(&payload)?;

    let result = sqlx::query("UPDATE albums SET name = $1, year = $2 WHERE id = $3")
        .bind(payload.name.trim())
        .bind(payload.year)
        .bind(&album_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "album not found",
        ));
    }

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub(crate) async fn delete_album(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM albums WHERE id = $1")
        .bind(&album_id)
        .execute(&state.pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "album not found",
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

    #[test]
    fn payload_rejects_blank_name() {
        let payload = AlbumPayload {
            name: "   ".to_string(),
            year: 2000,
        };
        assert!(validate_album_payload(&payload).is_err());
    }

    #[test]
    fn payload_rejects_out_of_range_year() {
        let payload = AlbumPayload {
            name: "Viva la Vida".to_string(),
            year: 1800,
        };
        assert!(validate_album_payload(&payload).is_err());

        let payload = AlbumPayload {
            name: "Viva la Vida".to_string(),
            year: chrono::Utc::now().year() + 1,
        };
        assert!(validate_album_payload(&payload).is_err());
    }

    #[test]
    fn payload_accepts_valid_input() {
        let payload = AlbumPayload {
            name: "Viva la Vida".to_string(),
            year: 2008,
        };
        assert!(validate_album_payload(&payload).is_ok());
    }

    #[tokio::test]
    async fn create_album_rejects_invalid_json() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/albums")
                    .header("content-type", "application/json")
                    .body(Body::from("{invalid"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_album_rejects_invalid_year() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/albums")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"Viva la Vida","year":1800}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
