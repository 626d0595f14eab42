use rota_config::RotationSettings;
use sqlx::PgPool;

use crate::error::Result;

/// Reads and writes the single live `settings` row the watcher polls.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn current(&self) -> Result<RotationSettings> {
        let row: (String, i32, i32, bool, bool, bool, i64, i32) = sqlx::query_as(
            r#"
            SELECT method, window_seconds, max_requests_per_window, count_failed_in_window,
                   remove_unhealthy, fallback, timeout_ms, retries
            FROM settings
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let method = row.0.parse().unwrap_or(rota_config::RotationMethod::RoundRobin);

        Ok(RotationSettings {
            method,
            window_seconds: row.1 as u32,
            max_requests_per_window: row.2 as u32,
            count_failed_in_window: row.3,
            remove_unhealthy: row.4,
            fallback: row.5,
            timeout_ms: row.6 as u64,
            retries: row.7 as u32,
        })
    }

    pub async fn save(&self, settings: &RotationSettings) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE settings
            SET method = $1, window_seconds = $2, max_requests_per_window = $3,
                count_failed_in_window = $4, remove_unhealthy = $5, fallback = $6,
                timeout_ms = $7, retries = $8, updated_at = NOW()
            WHERE id = 1
            "#,
        )
        .bind(settings.method.to_string())
        .bind(settings.window_seconds as i32)
        .bind(settings.max_requests_per_window as i32)
        .bind(settings.count_failed_in_window)
        .bind(settings.remove_unhealthy)
        .bind(settings.fallback)
        .bind(settings.timeout_ms as i64)
        .bind(settings.retries as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
