use sqlx::PgPool;

use crate::error::Result;
use crate::models::{DashboardStats, NewRequestRecord, RequestRecord};

/// The request log (C2): an append-only record of every dispatch attempt,
/// used both for the admin API's `/api/v1/requests` view and as the usage
/// signal behind the rate-limited selector.
#[derive(Clone)]
pub struct LogRepository {
    pool: PgPool,
}

impl LogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a request record. Dispatch ordering guarantees this is
    /// called once per attempt, in attempt order, before the next attempt
    /// in the same dispatch begins.
    pub async fn append(&self, record: &NewRequestRecord) -> Result<RequestRecord> {
        let row = sqlx::query_as::<_, RequestRecord>(
            r#"
            INSERT INTO proxy_requests
                (proxy_id, method, target_host, status_code, success, duration_ms, error, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, proxy_id, method, target_host, status_code, success, duration_ms, error, timestamp
            "#,
        )
        .bind(record.proxy_id)
        .bind(&record.method)
        .bind(&record.target_host)
        .bind(record.status_code)
        .bind(record.success)
        .bind(record.duration_ms)
        .bind(&record.error)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Count of requests against `proxy_id` within the trailing
    /// `window_seconds`, used by the rate-limited selector's usage view.
    ///
    /// When `count_failed` is false (the default, see DESIGN.md), only
    /// `success = true` rows count toward the window quota.
    pub async fn count_recent(
        &self,
        proxy_id: i32,
        window_seconds: u32,
        count_failed: bool,
    ) -> Result<i64> {
        let count = if count_failed {
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM proxy_requests
                WHERE proxy_id = $1 AND timestamp >= NOW() - ($2 || ' seconds')::interval
                "#,
            )
            .bind(proxy_id)
            .bind(window_seconds.to_string())
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar::<_, i64>(
                r#"
                SELECT COUNT(*) FROM proxy_requests
                WHERE proxy_id = $1 AND success = true
                  AND timestamp >= NOW() - ($2 || ' seconds')::interval
                "#,
            )
            .bind(proxy_id)
            .bind(window_seconds.to_string())
            .fetch_one(&self.pool)
            .await?
        };

        Ok(count)
    }

    /// Recent-request counts for every active proxy in one query, used to
    /// refresh the rate-limited selector's usage view without one query per
    /// candidate.
    pub async fn count_recent_all(
        &self,
        window_seconds: u32,
        count_failed: bool,
    ) -> Result<Vec<(i32, i64)>> {
        let rows: Vec<(i32, i64)> = if count_failed {
            sqlx::query_as(
                r#"
                SELECT proxy_id, COUNT(*) FROM proxy_requests
                WHERE proxy_id IS NOT NULL AND timestamp >= NOW() - ($1 || ' seconds')::interval
                GROUP BY proxy_id
                "#,
            )
            .bind(window_seconds.to_string())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT proxy_id, COUNT(*) FROM proxy_requests
                WHERE proxy_id IS NOT NULL AND success = true
                  AND timestamp >= NOW() - ($1 || ' seconds')::interval
                GROUP BY proxy_id
                "#,
            )
            .bind(window_seconds.to_string())
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows)
    }

    pub async fn list_recent(&self, limit: i64, offset: i64) -> Result<Vec<RequestRecord>> {
        let rows = sqlx::query_as::<_, RequestRecord>(
            r#"
            SELECT id, proxy_id, method, target_host, status_code, success, duration_ms, error, timestamp
            FROM proxy_requests
            ORDER BY timestamp DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit.clamp(1, 1000))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Aggregate counters behind `/api/v1/dashboard/stats`.
    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let (total_proxies,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM proxies").fetch_one(&self.pool).await?;
        let (active_proxies,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM proxies WHERE status = 'active'")
                .fetch_one(&self.pool)
                .await?;
        let (unhealthy_proxies,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM proxies WHERE status = 'unhealthy'")
                .fetch_one(&self.pool)
                .await?;
        let (requests_last_minute,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM proxy_requests WHERE timestamp >= NOW() - INTERVAL '1 minute'",
        )
        .fetch_one(&self.pool)
        .await?;
        let (requests_last_hour, successes_last_hour): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0)
            FROM proxy_requests WHERE timestamp >= NOW() - INTERVAL '1 hour'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let success_rate_last_hour = if requests_last_hour > 0 {
            successes_last_hour as f64 / requests_last_hour as f64
        } else {
            1.0
        };

        Ok(DashboardStats {
            total_proxies,
            active_proxies,
            unhealthy_proxies,
            requests_last_minute,
            requests_last_hour,
            success_rate_last_hour,
        })
    }
}
