use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use rota_config::RotationSettings;
use rota_db::{LogRepository, ProxyRepository, SettingsRepository};
use rota_selector::SettingsWatcher;
use sqlx::PgPool;

/// Shared state every handler reads from. Cloning is cheap — every field is
/// either a `PgPool` handle or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub proxy_repo: ProxyRepository,
    pub log_repo: LogRepository,
    pub settings_repo: SettingsRepository,
    pub settings_handle: Arc<ArcSwap<RotationSettings>>,
    pub watcher_heartbeat: Arc<std::sync::Mutex<Option<Instant>>>,
    pub watcher_poll_interval: std::time::Duration,
    pub started_at: Instant,
    pub admin_identity: Option<(String, String)>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        proxy_repo: ProxyRepository,
        log_repo: LogRepository,
        settings_repo: SettingsRepository,
        watcher: &SettingsWatcher,
        admin_identity: Option<(String, String)>,
    ) -> Self {
        Self {
            pool,
            proxy_repo,
            log_repo,
            settings_repo,
            settings_handle: watcher.settings_handle(),
            watcher_heartbeat: watcher.heartbeat(),
            watcher_poll_interval: watcher.poll_interval(),
            started_at: Instant::now(),
            admin_identity,
        }
    }
}
