use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use resolver::resolve::{ResolveError, Resolver};
use resolver::shared_cache::{RedisCache, SharedCache};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Resolver,
    pub redis: Arc<RedisCache>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/resolve", get(resolve))
        .route("/routes/{key}", delete(invalidate))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Deserialize, Debug)]
struct ResolveParams {
    key: String,
}

#[derive(Serialize)]
struct ResolveResponse {
    project: String,
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

struct ApiError(ResolveError);

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            ResolveError::RouteNotFound => StatusCode::NOT_FOUND,
            ResolveError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(ApiErrorResponse {
            error_message: self.0.to_string(),
        });

        (status, body).into_response()
    }
}

async fn resolve(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let project = state.resolver.resolve(&params.key).await?;
    Ok(Json(ResolveResponse { project }))
}

async fn invalidate(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.resolver.invalidate(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Liveness plus shared-tier visibility. A Redis outage is reported but
/// does not fail the probe: resolution degrades to the store and the
/// instance stays in rotation.
async fn health(State(state): State<AppState>) -> Response {
    let stats = state.redis.stats();
    let redis_reachable = state.redis.ping().await.is_ok();

    let body = serde_json::json!({
        "status": "ok",
        "redis": {
            "reachable": redis_reachable,
            "connections": stats.connections,
            "idle": stats.idle,
            "max_size": stats.max_size,
        },
    });

    (StatusCode::OK, Json(body)).into_response()
}
