use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `GET /health`. 200 while the database is reachable, 503 once it isn't —
/// the core availability signal the dashboard polls. `degraded` is an
/// additive detail inside the 200 body: the settings watcher has gone
/// quiet, which doesn't make the process unavailable but is worth a flag.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = rota_db::ping(&state.pool).await.is_ok();
    let heartbeat_age = state
        .watcher_heartbeat
        .lock()
        .expect("lock poisoned")
        .map(|at| at.elapsed());

    let (status, label) = classify(db_ok, heartbeat_age, state.watcher_poll_interval);
    let body = json!({
        "status": label,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    });
    (status, Json(body))
}

fn classify(db_ok: bool, heartbeat_age: Option<Duration>, poll_interval: Duration) -> (StatusCode, &'static str) {
    if !db_ok {
        return (StatusCode::SERVICE_UNAVAILABLE, "down");
    }

    let stale = match heartbeat_age {
        Some(age) => age > poll_interval * 3,
        None => false,
    };
    if stale {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "up")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_when_db_unreachable_regardless_of_heartbeat() {
        let (status, label) = classify(false, Some(Duration::from_secs(0)), Duration::from_secs(10));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(label, "down");
    }

    #[test]
    fn up_when_db_ok_and_heartbeat_fresh() {
        let (status, label) = classify(true, Some(Duration::from_secs(1)), Duration::from_secs(10));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(label, "up");
    }

    #[test]
    fn degraded_when_heartbeat_stale_past_three_intervals() {
        let (status, label) = classify(true, Some(Duration::from_secs(31)), Duration::from_secs(10));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(label, "degraded");
    }

    #[test]
    fn up_when_heartbeat_never_recorded_yet() {
        let (status, label) = classify(true, None, Duration::from_secs(10));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(label, "up");
    }
}
