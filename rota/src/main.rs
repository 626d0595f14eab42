use std::sync::Arc;
use std::time::Duration;

use rota_config::StartupConfig;
use rota_core::Ingress;
use rota_db::{LogRepository, ProxyRepository, SettingsRepository};
use rota_dispatcher::Dispatcher;
use rota_prober::Prober;
use rota_selector::SettingsWatcher;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How often the settings watcher polls the `settings` row for changes.
const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on how stale the rate-limited selector's usage view is
/// allowed to get; spec calls for `min(window_seconds/4, 5s)`, so a fixed
/// ticker below the 5s floor keeps every configured window within bound.
const USAGE_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let cfg = StartupConfig::from_env()?;
    info!(target: "rota", proxy_port = cfg.proxy_port, api_port = cfg.api_port, "starting rota");

    let pool = rota_db::connect(&cfg.database_url()).await?;
    let proxy_repo = ProxyRepository::new(pool.clone());
    let log_repo = LogRepository::new(pool.clone());
    let settings_repo = SettingsRepository::new(pool.clone());

    let initial_settings = settings_repo.current().await?;
    let report = rota_config::validate(&initial_settings);
    if report.has_errors() {
        anyhow::bail!("stored rotation settings are invalid: {}", report.format());
    }

    let watcher = SettingsWatcher::new(
        initial_settings,
        settings_repo.clone(),
        log_repo.clone(),
        SETTINGS_POLL_INTERVAL,
    );
    let selector_handle = watcher.handle();
    let settings_handle = watcher.settings_handle();

    let dispatcher = Arc::new(Dispatcher::new(
        selector_handle.clone(),
        settings_handle.clone(),
        proxy_repo.clone(),
        log_repo.clone(),
    ));

    let shutdown = CancellationToken::new();

    let watcher = Arc::new(watcher);
    tokio::spawn({
        let watcher = watcher.clone();
        async move { watcher.run().await }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(USAGE_REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = selector_handle.load_full().refresh().await {
                tracing::warn!(target: "rota::selector", error = %err, "usage view refresh failed");
            }
        }
    });

    let prober = Prober::new(
        proxy_repo.clone(),
        Duration::from_secs(cfg.probe_interval_seconds),
        cfg.probe_target_host.clone(),
        cfg.probe_target_port,
    );
    tokio::spawn(async move { prober.run().await });

    let ingress = Ingress::new(
        format!("0.0.0.0:{}", cfg.proxy_port),
        dispatcher,
        10_000,
        shutdown.clone(),
    );
    let ingress_task = tokio::spawn(async move {
        if let Err(err) = ingress.run().await {
            error!(target: "rota::ingress", error = %err, "ingress listener exited with error");
        }
    });

    let api_state = rota_api::AppState::new(
        pool,
        proxy_repo,
        log_repo,
        settings_repo,
        &watcher,
        cfg.admin_identity().map(|(u, p)| (u.to_string(), p.to_string())),
    );
    let api_addr = format!("0.0.0.0:{}", cfg.api_port).parse()?;
    tokio::spawn(async move {
        if let Err(err) = rota_api::serve(api_addr, api_state).await {
            error!(target: "rota::api", error = %err, "admin API exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!(target: "rota", "shutdown signal received");
    shutdown.cancel();

    let _ = ingress_task.await;
    Ok(())
}
