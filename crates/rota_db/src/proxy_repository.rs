use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};

use crate::error::{DbError, Result};
use crate::models::{NewProxy, Proxy, ProxyStatus, ProxyUpdate};

const PROXY_COLUMNS: &str = r#"
    id, address, protocol, username, password, status,
    requests, successful_requests, failed_requests, avg_response_time_ms,
    last_check, last_error, auto_delete_after_failed_seconds, invalid_since,
    created_at, updated_at
"#;

/// The proxy repository (C1): the pool of upstream proxies a selector draws
/// candidates from.
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every proxy a selector may currently choose.
    pub async fn list_active(&self) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE status = 'active' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    /// Every `unhealthy` proxy, the candidate set the prober probes.
    pub async fn list_unhealthy(&self) -> Result<Vec<Proxy>> {
        let proxies = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE status = 'unhealthy' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(proxies)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Proxy>> {
        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(proxy)
    }

    pub async fn list(&self, status: Option<ProxyStatus>, limit: i64, offset: i64) -> Result<Vec<Proxy>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {PROXY_COLUMNS} FROM proxies WHERE 1=1"
        ));
        if let Some(status) = status {
            query.push(" AND status = ").push_bind(status);
        }
        query
            .push(" ORDER BY id LIMIT ")
            .push_bind(limit.clamp(1, 500))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        let proxies = query.build_query_as::<Proxy>().fetch_all(&self.pool).await?;
        Ok(proxies)
    }

    pub async fn create(&self, new: &NewProxy) -> Result<Proxy> {
        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            r#"
            INSERT INTO proxies (address, protocol, username, password, auto_delete_after_failed_seconds)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PROXY_COLUMNS}
            "#
        ))
        .bind(&new.address)
        .bind(new.protocol)
        .bind(&new.username)
        .bind(&new.password)
        .bind(new.auto_delete_after_failed_seconds)
        .fetch_one(&self.pool)
        .await?;

        info!(id = proxy.id, address = %proxy.address, "registered proxy");
        Ok(proxy)
    }

    pub async fn update(&self, id: i32, update: &ProxyUpdate) -> Result<Option<Proxy>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };

        let address = update.address.as_ref().unwrap_or(&current.address);
        let protocol = update.protocol.unwrap_or(current.protocol);
        let username = update.username.as_ref().or(current.username.as_ref());
        let password = update.password.as_ref().or(current.password.as_ref());
        let status = update.status.unwrap_or(current.status);

        let proxy = sqlx::query_as::<_, Proxy>(&format!(
            r#"
            UPDATE proxies
            SET address = $2, protocol = $3, username = $4, password = $5, status = $6,
                invalid_since = CASE WHEN $6 = 'unhealthy' THEN COALESCE(invalid_since, NOW()) ELSE NULL END
            WHERE id = $1
            RETURNING {PROXY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(address)
        .bind(protocol)
        .bind(username)
        .bind(password)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref p) = proxy {
            info!(id = p.id, address = %p.address, "updated proxy");
        }
        Ok(proxy)
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id, "deleted proxy");
        }
        Ok(deleted)
    }

    /// Mark a proxy's status directly (used by the dispatcher when
    /// `remove_unhealthy` is set, and by the prober on promotion/demotion).
    pub async fn set_status(&self, id: i32, status: ProxyStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE proxies
            SET status = $2,
                invalid_since = CASE WHEN $2 = 'unhealthy' THEN COALESCE(invalid_since, NOW()) ELSE NULL END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::ProxyNotFound(id));
        }
        Ok(())
    }

    /// Update lifetime counters and the rolling average response time after
    /// a dispatch attempt against this proxy. Never touches `status` on its
    /// own — the dispatcher decides whether a failure demotes the proxy,
    /// per `remove_unhealthy`.
    pub async fn record_attempt(
        &self,
        id: i32,
        success: bool,
        response_time_ms: i32,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proxies
            SET requests = requests + 1,
                successful_requests = successful_requests + CASE WHEN $2 THEN 1 ELSE 0 END,
                failed_requests = failed_requests + CASE WHEN $2 THEN 0 ELSE 1 END,
                avg_response_time_ms = (
                    CASE
                        WHEN requests = 0 THEN $3
                        ELSE ((avg_response_time_ms * requests) + $3) / (requests + 1)
                    END
                )::INTEGER,
                last_check = NOW(),
                last_error = CASE WHEN $2 THEN last_error ELSE $4 END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(response_time_ms)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_by_status(&self, status: ProxyStatus) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_total(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM proxies")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Archive proxies that have been continuously `unhealthy` past their
    /// configured `auto_delete_after_failed_seconds`, moving them to
    /// `deleted_proxies` rather than hard-deleting them.
    pub async fn archive_expired_unhealthy(&self, limit: i64) -> Result<Vec<i32>> {
        let limit = limit.clamp(1, 1000);

        let archived: Vec<i32> = sqlx::query_scalar(
            r#"
            WITH candidates AS (
                SELECT id FROM proxies
                WHERE status = 'unhealthy'
                  AND auto_delete_after_failed_seconds IS NOT NULL
                  AND auto_delete_after_failed_seconds > 0
                  AND invalid_since IS NOT NULL
                  AND EXTRACT(EPOCH FROM (NOW() - invalid_since)) >= auto_delete_after_failed_seconds
                ORDER BY invalid_since ASC
                LIMIT $1
            ),
            inserted AS (
                INSERT INTO deleted_proxies
                SELECT p.*, NOW() AS deleted_at FROM proxies p
                JOIN candidates c ON c.id = p.id
                ON CONFLICT (id) DO NOTHING
                RETURNING id
            ),
            removed AS (
                DELETE FROM proxies WHERE id IN (SELECT id FROM inserted) RETURNING id
            )
            SELECT id FROM removed
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        if !archived.is_empty() {
            warn!(count = archived.len(), "archived expired unhealthy proxies");
        }
        Ok(archived)
    }
}
