use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rota_config::{validate, RotationMethod, RotationSettings};
use rota_db::{LogRepository, SettingsRepository};
use tokio::time::interval;
use tracing::{info, warn};

use crate::least_connections::LeastConnectionsSelector;
use crate::random::RandomSelector;
use crate::rate_limited::{RateLimitedSelector, UsageSource};
use crate::round_robin::RoundRobinSelector;
use crate::selector::Selector;

/// Builds a concrete selector for the given settings. Exposed separately
/// from the watcher so the initial selector can be constructed once at
/// startup before the watch loop begins. `usage_source` is only consulted
/// by the rate-limited method; other methods ignore it.
pub fn build_selector(
    settings: &RotationSettings,
    usage_source: impl UsageSource + 'static,
) -> Arc<dyn Selector> {
    match settings.method {
        RotationMethod::RoundRobin => Arc::new(RoundRobinSelector::new()),
        RotationMethod::Random => Arc::new(RandomSelector::new()),
        RotationMethod::LeastConnections => Arc::new(LeastConnectionsSelector::new()),
        RotationMethod::RateLimited => Arc::new(RateLimitedSelector::new(
            usage_source,
            settings.window_seconds,
            settings.max_requests_per_window,
            settings.count_failed_in_window,
        )),
    }
}

/// Polls the `settings` table and atomically swaps the active selector
/// whenever the stored method or rate-limited parameters change. Readers
/// (the dispatcher) hold an `Arc` to the active selector for the duration
/// of one dispatch and never block on a writer.
pub struct SettingsWatcher {
    active: Arc<ArcSwap<dyn Selector>>,
    settings: Arc<ArcSwap<RotationSettings>>,
    settings_repo: SettingsRepository,
    log_repo: LogRepository,
    last_applied: std::sync::Mutex<Option<RotationSettings>>,
    last_poll_at: Arc<std::sync::Mutex<Option<std::time::Instant>>>,
    poll_interval: Duration,
}

impl SettingsWatcher {
    pub fn new(
        initial_settings: RotationSettings,
        settings_repo: SettingsRepository,
        log_repo: LogRepository,
        poll_interval: Duration,
    ) -> Self {
        let initial_selector = build_selector(&initial_settings, log_repo.clone());
        Self {
            active: Arc::new(ArcSwap::from(initial_selector)),
            settings: Arc::new(ArcSwap::from_pointee(initial_settings.clone())),
            settings_repo,
            log_repo,
            last_applied: std::sync::Mutex::new(Some(initial_settings)),
            last_poll_at: Arc::new(std::sync::Mutex::new(None)),
            poll_interval,
        }
    }

    /// A handle dispatchers use to read the current selector without
    /// blocking on the watcher.
    pub fn handle(&self) -> Arc<ArcSwap<dyn Selector>> {
        Arc::clone(&self.active)
    }

    /// A handle dispatchers use to read the current dispatch parameters
    /// (timeout, retries, fallback, remove_unhealthy) alongside the
    /// selector — both are swapped from the same settings row.
    pub fn settings_handle(&self) -> Arc<ArcSwap<RotationSettings>> {
        Arc::clone(&self.settings)
    }

    /// A handle the admin API's `/health` endpoint uses to report
    /// `degraded` when the poll loop has gone quiet for longer than
    /// `3 * poll_interval`, independent of whether the DB round trip
    /// inside a given tick actually failed (a hung task looks the same
    /// from the DB's point of view as a healthy one).
    pub fn heartbeat(&self) -> Arc<std::sync::Mutex<Option<std::time::Instant>>> {
        Arc::clone(&self.last_poll_at)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs the poll loop forever. Intended to be spawned as its own task.
    pub async fn run(&self) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        *self.last_poll_at.lock().expect("lock poisoned") = Some(std::time::Instant::now());

        let fetched = match self.settings_repo.current().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(target: "rota::selector", error = %err, "settings poll failed");
                return;
            }
        };

        let unchanged = self
            .last_applied
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .is_some_and(|prev| *prev == fetched);
        if unchanged {
            return;
        }

        let report = validate(&fetched);
        if report.has_errors() {
            warn!(
                target: "rota::selector",
                errors = %report.format(),
                "rejected invalid settings update; keeping previous selector"
            );
            return;
        }

        let next = build_selector(&fetched, self.log_repo.clone());
        self.active.store(next);
        self.settings.store(Arc::new(fetched.clone()));
        *self.last_applied.lock().expect("lock poisoned") = Some(fetched.clone());
        info!(target: "rota::selector", method = %fetched.method, "applied new rotation settings");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnusedUsageSource;

    #[async_trait::async_trait]
    impl UsageSource for UnusedUsageSource {
        async fn count_recent_all(
            &self,
            _window_seconds: u32,
            _count_failed: bool,
        ) -> Result<Vec<(i32, i64)>, rota_db::DbError> {
            unreachable!("round-robin/random/least-connections never refresh")
        }
    }

    #[test]
    fn build_selector_matches_method() {
        let settings = RotationSettings {
            method: RotationMethod::Random,
            ..RotationSettings::default()
        };
        let selector = build_selector(&settings, UnusedUsageSource);
        assert_eq!(selector.method(), RotationMethod::Random);
    }
}
