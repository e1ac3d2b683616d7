//! Album like-counts, kept consistent between Redis and Postgres with a
//! cache-aside strategy.
//!
//! Reads check the cache first and fall back to the fact table on a miss
//! or a cache failure, repopulating the cache afterwards. Writes mutate
//! the fact table and then delete the cached count instead of updating
//! it, so a stale entry can only survive until the next write or TTL
//! expiry. A read racing a write may still repopulate a pre-write count;
//! that window is accepted and bounded by the entry TTL.
//!
//! The one-like-per-user rule is enforced by the UNIQUE constraint on
//! `album_likes (user_id, album_id)`. The service-level existence check
//! only exists to answer the common case without burning an insert.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use medley_core::cache::CacheStore;
use medley_core::metrics;
use serde::Serialize;
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::require_user;
use crate::{ApiError, ApiResult, AppState, SERVICE_NAME};

#[derive(Debug, Error)]
pub enum LikeError {
    #[error("album not found")]
    AlbumNotFound,
    #[error("no like recorded for this user and album")]
    LikeNotFound,
    #[error("album already liked by this user")]
    AlreadyLiked,
    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountSource {
    Cache,
    Database,
}

impl CountSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CountSource::Cache => "cache",
            CountSource::Database => "database",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeCount {
    pub count: i64,
    pub source: CountSource,
}

fn cache_key(album_id: &str) -> String {
    format!("likes:{album_id}")
}

/// Durable side of the like subsystem: the fact table plus the album
/// lookup used to validate new likes.
#[async_trait]
pub trait LikeStore: Send + Sync {
    async fn album_exists(&self, album_id: &str) -> Result<bool, LikeError>;
    async fn like_exists(&self, album_id: &str, user_id: &str) -> Result<bool, LikeError>;
    /// Inserts one like fact. A duplicate `(user_id, album_id)` pair must
    /// fail with [`LikeError::AlreadyLiked`], not a generic error.
    async fn insert_like(&self, id: &str, user_id: &str, album_id: &str)
        -> Result<(), LikeError>;
    /// Removes the caller's like fact, returning the number of rows
    /// removed.
    async fn delete_like(&self, album_id: &str, user_id: &str) -> Result<u64, LikeError>;
    async fn count_likes(&self, album_id: &str) -> Result<i64, LikeError>;
}

pub struct PgLikeStore {
    pool: Pool<Postgres>,
}

impl PgLikeStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LikeStore for PgLikeStore {
    async fn album_exists(&self, album_id: &str) -> Result<bool, LikeError> {
        let found = sqlx::query_scalar::<_, String>("SELECT id FROM albums WHERE id = $1")
            .bind(album_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn like_exists(&self, album_id: &str, user_id: &str) -> Result<bool, LikeError> {
        let found = sqlx::query_scalar::<_, String>(
            "SELECT id FROM album_likes WHERE album_id = $1 AND user_id = $2",
        )
        .bind(album_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn insert_like(
        &self,
        id: &str,
        user_id: &str,
        album_id: &str,
    ) -> Result<(), LikeError> {
        let result = sqlx::query("INSERT INTO album_likes (id, user_id, album_id) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(user_id)
            .bind(album_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LikeError::AlreadyLiked)
            }
            Err(err) => Err(LikeError::Storage(err)),
        }
    }

    async fn delete_like(&self, album_id: &str, user_id: &str) -> Result<u64, LikeError> {
        let result = sqlx::query("DELETE FROM album_likes WHERE album_id = $1 AND user_id = $2")
            .bind(album_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_likes(&self, album_id: &str) -> Result<i64, LikeError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM album_likes WHERE album_id = $1")
                .bind(album_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Orchestrates the like count across the cache and the durable store.
/// Sole writer and invalidator of the `likes:{album_id}` cache keys.
#[derive(Clone)]
pub struct LikeService {
    store: Arc<dyn LikeStore>,
    cache: Arc<dyn CacheStore>,
}

impl LikeService {
    pub fn new(store: Arc<dyn LikeStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self { store, cache }
    }

    pub async fn add_like(&self, album_id: &str, user_id: &str) -> Result<String, LikeError> {
        if !self.store.album_exists(album_id).await? {
            return Err(LikeError::AlbumNotFound);
        }

        if self.store.like_exists(album_id, user_id).await? {
            return Err(LikeError::AlreadyLiked);
        }

        let id = format!("like-{}", Uuid::new_v4());
        // Concurrent duplicates slip past the check above; the UNIQUE
        // constraint rejects them here and surfaces the same outcome.
        self.store.insert_like(&id, user_id, album_id).await?;

        self.invalidate(album_id).await;
        Ok(id)
    }

    pub async fn remove_like(&self, album_id: &str, user_id: &str) -> Result<(), LikeError> {
        let removed = self.store.delete_like(album_id, user_id).await?;
        if removed == 0 {
            return Err(LikeError::LikeNotFound);
        }

        self.invalidate(album_id).await;
        Ok(())
    }

    pub async fn like_count(&self, album_id: &str) -> Result<LikeCount, LikeError> {
        let key = cache_key(album_id);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match raw.parse::<i64>() {
                Ok(count) => {
                    metrics::inc_like_cache_hit(SERVICE_NAME);
                    return Ok(LikeCount {
                        count,
                        source: CountSource::Cache,
                    });
                }
                Err(_) => {
                    metrics::inc_like_cache_miss(SERVICE_NAME);
                    warn!(key = %key, "unparseable cache entry, discarding");
                    if let Err(err) = self.cache.delete(&key).await {
                        warn!(key = %key, error = %err, "failed to discard cache entry");
                    }
                }
            },
            Ok(None) => {
                metrics::inc_like_cache_miss(SERVICE_NAME);
            }
            Err(err) => {
                // Transport failure, not a miss; logged, then treated the
                // same way. The durable store is the fallback of record.
                metrics::inc_like_cache_error(SERVICE_NAME);
                warn!(key = %key, error = %err, "cache read failed, falling back to database");
            }
        }

        let count = self.store.count_likes(album_id).await?;

        if let Err(err) = self.cache.set(&key, &count.to_string()).await {
            warn!(key = %key, error = %err, "failed to repopulate cache");
        }

        Ok(LikeCount {
            count,
            source: CountSource::Database,
        })
    }

    async fn invalidate(&self, album_id: &str) {
        // The write already happened; a failed invalidation means the
        // cache is unavailable, so the entry is gone or will expire.
        if let Err(err) = self.cache.delete(&cache_key(album_id)).await {
            warn!(album_id = %album_id, error = %err, "cache invalidation failed");
        }
    }
}

fn like_error(err: LikeError) -> ApiError {
    match err {
        LikeError::AlbumNotFound => {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "album not found")
        }
        LikeError::LikeNotFound => ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no like recorded for this user and album",
        ),
        LikeError::AlreadyLiked => ApiError::new(
            StatusCode::CONFLICT,
            "ALREADY_LIKED",
            "album already liked by this user",
        ),
        LikeError::Storage(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DB_ERROR",
            err.to_string(),
        ),
    }
}

#[derive(Serialize, ToSchema)]
pub struct LikeCreated {
    pub like_id: String,
}

#[derive(Serialize, ToSchema)]
pub struct LikesResponse {
    pub likes: i64,
}

pub(crate) async fn add_like(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<LikeCreated>)> {
    let user_id = require_user(&state, &headers)?;
    let like_id = state
        .likes
        .add_like(&album_id, &user_id)
        .await
        .map_err(like_error)?;
    Ok((StatusCode::CREATED, Json(LikeCreated { like_id })))
}

pub(crate) async fn remove_like(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = require_user(&state, &headers)?;
    state
        .likes
        .remove_like(&album_id, &user_id)
        .await
        .map_err(like_error)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub(crate) async fn get_like_count(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> ApiResult<(HeaderMap, Json<LikesResponse>)> {
    let result = state.likes.like_count(&album_id).await.map_err(like_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "x-data-source",
        HeaderValue::from_static(result.source.as_str()),
    );

    Ok((headers, Json(LikesResponse {
        likes: result.count,
    })))
}
