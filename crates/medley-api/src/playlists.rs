use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::Row;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_user;
use crate::{ApiError, ApiResult, AppState};

#[derive(Deserialize, ToSchema)]
pub struct PlaylistPayload {
    pub name: String,
}

#[derive(Serialize, ToSchema)]
pub struct PlaylistCreated {
    pub playlist_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PlaylistSongPayload {
    pub song_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct PlaylistWithSongs {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub songs: Vec<PlaylistSong>,
}

#[derive(Serialize, ToSchema)]
pub struct PlaylistSong {
    pub id: String,
    pub title: String,
    pub performer: String,
}

#[derive(Serialize, ToSchema)]
pub struct PlaylistActivity {
    pub song_id: String,
    pub user_id: String,
    pub action: String,
    pub time: i64,
}

/// Loads the playlist owner and enforces that `user_id` is it.
/// Missing playlist is 404 so callers cannot probe foreign playlists
/// apart from guessed ids.
pub(crate) async fn require_owned_playlist(
    state: &AppState,
    playlist_id: &str,
    user_id: &str,
) -> ApiResult<()> {
    let owner = sqlx::query_scalar::<_, String>("SELECT owner FROM playlists WHERE id = $1")
        .bind(playlist_id)
        .fetch_optional(&state.pool)
        .await?;
    let Some(owner) = owner else {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "playlist not found",
        ));
    };
    if owner != user_id {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "playlist belongs to another user",
        )
        .with_details(json!({ "playlist_id": playlist_id })));
    }
    Ok(())
}

pub(crate) async fn create_playlist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PlaylistPayload>,
) -> ApiResult<(StatusCode, Json<PlaylistCreated>)> {
    let user_id = require_user(&state, &headers)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "name must not be empty",
        ));
    }

    let playlist_id = format!("playlist-{}", Uuid::new_v4());
    sqlx::query("INSERT INTO playlists (id, name, owner) VALUES ($1, $2, $3)")
        .bind(&playlist_id)
        .bind(payload.name.trim())
        .bind(&user_id)
        .execute(&state.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(PlaylistCreated { playlist_id })))
}

pub(crate) async fn list_playlists(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Playlist>>> {
    let user_id = require_user(&state, &headers)?;

    let rows = sqlx::query("SELECT id, name, owner FROM playlists WHERE owner = $1 ORDER BY name")
        .bind(&user_id)
        .fetch_all(&state.pool)
        .await?;

    let mut playlists = Vec::new();
    for row in rows {
        playlists.push(Playlist {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            owner: row.try_get("owner")?,
        });
    }

    Ok(Json(playlists))
}

pub(crate) async fn delete_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    sqlx::query("DELETE FROM playlists WHERE id = $1")
        .bind(&playlist_id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({ "status": "ok" })))
}

pub(crate) async fn add_playlist_song(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<PlaylistSongPayload>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let user_id = require_user(&state, &headers)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    let song = sqlx::query_scalar::<_, String>("SELECT id FROM songs WHERE id = $1")
        .bind(&payload.song_id)
        .fetch_optional(&state.pool)
        .await?;
    if song.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "song not found",
        ));
    }

    let mut tx = state.pool.begin().await?;

    let entry_id = format!("playlist-song-{}", Uuid::new_v4());
    let result = sqlx::query(
        "INSERT INTO playlist_songs (id, playlist_id, song_id) VALUES ($1, $2, $3)",
    )
    .bind(&entry_id)
    .bind(&playlist_id)
    .bind(&payload.song_id)
    .execute(&mut *tx)
    .await;
    match result {
        Ok(_) => {}
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(ApiError::new(
                StatusCode::CONFLICT,
                "SONG_ALREADY_ADDED",
                "song is already on the playlist",
            ));
        }
        Err(err) => return Err(err.into()),
    }

    record_activity(&mut tx, &playlist_id, &payload.song_id, &user_id, "add").await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(json!({ "status": "ok" }))))
}

pub(crate) async fn list_playlist_songs(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<PlaylistWithSongs>> {
    let user_id = require_user(&state, &headers)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    let row = sqlx::query("SELECT id, name, owner FROM playlists WHERE id = $1")
        .bind(&playlist_id)
        .fetch_one(&state.pool)
        .await?;

    let song_rows = sqlx::query(
        "SELECT songs.id, songs.title, songs.performer \
         FROM songs JOIN playlist_songs ON playlist_songs.song_id = songs.id \
         WHERE playlist_songs.playlist_id = $1 ORDER BY songs.title",
    )
    .bind(&playlist_id)
    .fetch_all(&state.pool)
    .await?;

    let mut songs = Vec::new();
    for song in song_rows {
        songs.push(PlaylistSong {
            id: song.try_get("id")?,
            title: song.try_get("title")?,
            performer: song.try_get("performer")?,
        });
    }

    Ok(Json(PlaylistWithSongs {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner: row.try_get("owner")?,
        songs,
    }))
}

pub(crate) async fn remove_playlist_song(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<PlaylistSongPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    let mut tx = state.pool.begin().await?;

    let result = sqlx::query(
        "DELETE FROM playlist_songs WHERE playlist_id = $1 AND song_id = $2",
    )
    .bind(&playlist_id)
    .bind(&payload.song_id)
    .execute(&mut *tx)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "song is not on the playlist",
        ));
    }

    record_activity(&mut tx, &playlist_id, &payload.song_id, &user_id, "delete").await?;

    tx.commit().await?;

    Ok(Json(json!({ "status": "ok" })))
}

pub(crate) async fn list_activities(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<PlaylistActivity>>> {
    let user_id = require_user(&state, &headers)?;
    require_owned_playlist(&state, &playlist_id, &user_id).await?;

    let rows = sqlx::query(
        "SELECT song_id, user_id, action, time \
         FROM playlist_song_activities WHERE playlist_id = $1 ORDER BY time",
    )
    .bind(&playlist_id)
    .fetch_all(&state.pool)
    .await?;

    let mut activities = Vec::new();
    for row in rows {
        let time: chrono::DateTime<chrono::Utc> = row.try_get("time")?;
        activities.push(PlaylistActivity {
            song_id: row.try_get("song_id")?,
            user_id: row.try_get("user_id")?,
            action: row.try_get("action")?,
            time: time.timestamp(),
        });
    }

    Ok(Json(activities))
}

async fn record_activity(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    playlist_id: &str,
    song_id: &str,
    user_id: &str,
    action: &str,
) -> ApiResult<()> {
    sqlx::query(
        "INSERT INTO playlist_song_activities (id, playlist_id, song_id, user_id, action) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(format!("activity-{}", Uuid::new_v4()))
    .bind(playlist_id)
    .bind(song_id)
    .bind(user_id)
    .bind(action)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{auth_header, test_router};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn create_playlist_requires_bearer_token() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/playlists")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"Favorites"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_playlist_rejects_blank_name() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/playlists")
                    .header("authorization", auth_header("user-1"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"  "}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_activities_requires_bearer_token() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/playlists/playlist-1/activities")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
