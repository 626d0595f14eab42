use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use rota_db::{NewProxy, Proxy, ProxyStatus};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<ProxyStatus>,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// `GET /api/v1/proxies` — list registered proxies with their aggregate
/// stats, optionally filtered by status.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Proxy>>, ApiError> {
    let proxies = state.proxy_repo.list(query.status, query.limit, query.offset).await?;
    Ok(Json(proxies))
}

/// `POST /api/v1/proxies` — register a new upstream proxy.
pub async fn create(
    State(state): State<AppState>,
    Json(new_proxy): Json<NewProxy>,
) -> Result<(StatusCode, Json<Proxy>), ApiError> {
    let proxy = state.proxy_repo.create(&new_proxy).await?;
    Ok((StatusCode::CREATED, Json(proxy)))
}

/// `DELETE /api/v1/proxies/{id}` — remove a proxy outright.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let deleted = state.proxy_repo.delete(id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::ProxyNotFound(id))
    }
}
