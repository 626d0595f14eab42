mod error;
mod log_repository;
mod models;
mod proxy_repository;
mod settings_repository;

pub use error::{DbError, Result};
pub use log_repository::LogRepository;
pub use models::{
    DashboardStats, NewProxy, NewRequestRecord, Proxy, ProxyProtocol, ProxyStatus, ProxyUpdate,
    RequestRecord,
};
pub use proxy_repository::ProxyRepository;
pub use settings_repository::SettingsRepository;

use sqlx::postgres::PgPoolOptions;

/// Connects a bounded Postgres pool. Called once at startup with the URL
/// built from `StartupConfig::database_url`.
pub async fn connect(database_url: &str) -> Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// A trivial round trip used by `/health` to decide whether the DB is
/// reachable, independent of any particular repository.
pub async fn ping(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
