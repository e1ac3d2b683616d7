use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use medley_core::auth::JwtConfig;
use medley_core::cache::RedisCache;
use medley_core::producer::Producer;
use medley_core::{config, db, http, logging, metrics, server};
use serde::Serialize;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use utoipa::OpenApi;

mod albums;
mod auth;
mod exports;
#[cfg(test)]
mod integration_tests;
mod likes;
mod playlists;
mod songs;
#[cfg(test)]
pub(crate) mod testing;

pub use likes::{CountSource, LikeCount, LikeError, LikeService, LikeStore, PgLikeStore};

const SERVICE_NAME: &str = "medley-api";

#[derive(Clone)]
pub(crate) struct AppState {
    pool: Pool<Postgres>,
    likes: LikeService,
    producer: Producer,
    jwt: JwtConfig,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "DB_ERROR", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize, utoipa::ToSchema)]
struct HealthStatus {
    status: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(healthz, metrics_endpoint),
    components(schemas(
        HealthStatus,
        albums::AlbumPayload,
        albums::Album,
        songs::SongPayload,
        songs::Song,
        playlists::PlaylistPayload,
        playlists::Playlist,
        likes::LikesResponse,
        exports::ExportRequest,
    )),
    tags((name = "medley", description = "Media catalog API"))
)]
struct ApiDoc;

pub struct ApiConfig {
    pub addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub amqp_url: String,
    pub access_token_secret: String,
    pub cache_ttl_seconds: u64,
    pub cache_timeout_ms: u64,
}

pub fn load_config() -> Result<ApiConfig> {
    let addr = config::socket_addr_from_env("MEDLEY_API_ADDR", "0.0.0.0:8080")?;
    let database_url = config::required_env("DATABASE_URL")?;
    let redis_url = config::required_env("REDIS_URL")?;
    let amqp_url = config::required_env("AMQP_URL")?;
    let access_token_secret = config::required_env("ACCESS_TOKEN_SECRET")?;
    let cache_ttl_seconds = config::u64_from_env("CACHE_TTL_SECONDS", 1800);
    let cache_timeout_ms = config::u64_from_env("CACHE_TIMEOUT_MS", 500);
    Ok(ApiConfig {
        addr,
        database_url,
        redis_url,
        amqp_url,
        access_token_secret,
        cache_ttl_seconds,
        cache_timeout_ms,
    })
}

pub async fn run(config: ApiConfig) -> Result<()> {
    logging::init(SERVICE_NAME);
    metrics::init(SERVICE_NAME);

    let pool = db::connect(&config.database_url).await?;
    let cache = RedisCache::connect(
        &config.redis_url,
        config.cache_ttl_seconds,
        Duration::from_millis(config.cache_timeout_ms),
    )
    .await?;
    let producer = Producer::connect(&config.amqp_url).await?;

    let likes = LikeService::new(
        Arc::new(PgLikeStore::new(pool.clone())),
        Arc::new(cache),
    );

    let jwt = JwtConfig {
        issuer: "medley".to_string(),
        audience: "medley-api".to_string(),
        secret: config.access_token_secret,
        ttl_seconds: config::u64_from_env("ACCESS_TOKEN_TTL_SECONDS", 1800),
    };

    let state = AppState {
        pool,
        likes,
        producer,
        jwt,
    };

    let router = router(state);
    let router = http::apply_standard_layers(router, SERVICE_NAME);
    server::serve(config.addr, router).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .route("/v1/openapi.json", get(openapi_json))
        .route("/albums", post(albums::create_album))
        .route(
            "/albums/:album_id",
            get(albums::get_album)
                .put(albums::update_album)
                .delete(albums::delete_album),
        )
        .route(
            "/albums/:album_id/likes",
            post(likes::add_like)
                .delete(likes::remove_like)
                .get(likes::get_like_count),
        )
        .route("/songs", post(songs::create_song).get(songs::list_songs))
        .route(
            "/songs/:song_id",
            get(songs::get_song)
                .put(songs::update_song)
                .delete(songs::delete_song),
        )
        .route(
            "/playlists",
            post(playlists::create_playlist).get(playlists::list_playlists),
        )
        .route("/playlists/:playlist_id", delete(playlists::delete_playlist))
        .route(
            "/playlists/:playlist_id/songs",
            post(playlists::add_playlist_song)
                .get(playlists::list_playlist_songs)
                .delete(playlists::remove_playlist_song),
        )
        .route(
            "/playlists/:playlist_id/activities",
            get(playlists::list_activities),
        )
        .route(
            "/export/playlists/:playlist_id",
            post(exports::export_playlist),
        )
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Ready", body = HealthStatus))
)]
async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    match db::check_ready(&state.pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthStatus { status: "ok".into() })),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthStatus {
                status: "unavailable".into(),
            }),
        ),
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus metrics"))
)]
async fn metrics_endpoint() -> impl IntoResponse {
    metrics::metrics_response(SERVICE_NAME)
}

async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
