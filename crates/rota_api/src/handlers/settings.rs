use axum::extract::State;
use axum::Json;
use rota_config::{validate, RotationSettings};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /api/v1/settings` — the live rotation policy.
pub async fn get(State(state): State<AppState>) -> Json<RotationSettings> {
    Json((**state.settings_handle.load()).clone())
}

/// `PUT /api/v1/settings` — replace the rotation policy. Rejected with 422
/// if it fails the same validation the settings watcher applies on poll;
/// accepted settings are persisted and picked up by the next watcher tick,
/// not applied synchronously by this handler.
pub async fn put(
    State(state): State<AppState>,
    Json(settings): Json<RotationSettings>,
) -> Result<Json<RotationSettings>, ApiError> {
    let report = validate(&settings);
    if report.has_errors() {
        return Err(ApiError::InvalidSettings(report.format()));
    }

    state.settings_repo.save(&settings).await?;
    Ok(Json(settings))
}
