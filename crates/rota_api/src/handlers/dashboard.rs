use axum::extract::State;
use axum::Json;
use rota_db::DashboardStats;

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/v1/dashboard/stats` — aggregate counters behind the dashboard's
/// summary view, grounded on the reference implementation's own
/// `status` query shape (counts by status, request counts over 1m/1h).
pub async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    let stats = state.log_repo.dashboard_stats().await?;
    Ok(Json(stats))
}
