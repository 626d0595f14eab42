use axum::extract::{Query, State};
use axum::Json;
use rota_db::RequestRecord;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// `GET /api/v1/requests` — the most recent request records, newest first,
/// paginated with `limit`/`offset`.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RequestRecord>>, ApiError> {
    let records = state.log_repo.list_recent(query.limit, query.offset).await?;
    Ok(Json(records))
}
