use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use rota_config::RotationMethod;
use rota_db::{DbError, LogRepository, Proxy};

use crate::error::SelectorError;
use crate::selector::{SelectError, Selector};

/// The slice of the request log the rate-limited selector needs. Exists so
/// tests can fake the usage view without a live Postgres instance, the same
/// trait-object-swap spirit the teacher uses to test `Proxy` without
/// binding a real listener.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn count_recent_all(
        &self,
        window_seconds: u32,
        count_failed: bool,
    ) -> Result<Vec<(i32, i64)>, DbError>;
}

#[async_trait]
impl UsageSource for LogRepository {
    async fn count_recent_all(
        &self,
        window_seconds: u32,
        count_failed: bool,
    ) -> Result<Vec<(i32, i64)>, DbError> {
        LogRepository::count_recent_all(self, window_seconds, count_failed).await
    }
}

/// How trustworthy the cached usage view currently is, mirrored on the
/// teacher's failure-threshold/cooldown health state machine but applied to
/// a refresh clock instead of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    /// Refreshed within the last window; counts are trustworthy.
    Fresh,
    /// Refresh is overdue but counts are still the best information we
    /// have; quotas are still enforced.
    Stale,
    /// Several consecutive refreshes have failed; quotas are still enforced
    /// against the last known counts, but selection is flagged degraded.
    Degraded,
    /// The view has been unrefreshable for too long to trust at all;
    /// selection falls back to a stable ascending-id order so the
    /// dispatcher keeps working instead of stalling on a DB outage.
    Unavailable,
}

const DEGRADED_AFTER_MULTIPLE: u32 = 3;
const UNAVAILABLE_AFTER_CONSECUTIVE_FAILURES: u32 = 5;

/// Ranks candidates by recent request count within a trailing window,
/// skipping (or, if none qualify, least-penalizing) proxies over their
/// quota. The usage view is refreshed out-of-band by the settings watcher's
/// tick, not on every `select` call — see spec's single-writer/multi-reader
/// discipline.
pub struct RateLimitedSelector {
    usage_source: Box<dyn UsageSource>,
    window: Duration,
    window_seconds: u32,
    max_requests_per_window: u32,
    count_failed_in_window: bool,

    usage: ArcSwap<HashMap<i32, i64>>,
    last_refresh: RwLock<Option<Instant>>,
    consecutive_failures: AtomicU32,
}

impl RateLimitedSelector {
    pub fn new(
        usage_source: impl UsageSource + 'static,
        window_seconds: u32,
        max_requests_per_window: u32,
        count_failed_in_window: bool,
    ) -> Self {
        Self {
            usage_source: Box::new(usage_source),
            window: Duration::from_secs(window_seconds.max(1) as u64),
            window_seconds,
            max_requests_per_window,
            count_failed_in_window,
            usage: ArcSwap::from_pointee(HashMap::new()),
            last_refresh: RwLock::new(None),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> ViewState {
        let last = *self.last_refresh.read().expect("lock poisoned");
        let failures = self.consecutive_failures.load(Ordering::Relaxed);

        if failures >= UNAVAILABLE_AFTER_CONSECUTIVE_FAILURES {
            return ViewState::Unavailable;
        }
        if failures > 0 {
            return ViewState::Degraded;
        }

        match last {
            None => ViewState::Unavailable,
            Some(at) => {
                let elapsed = at.elapsed();
                if elapsed <= self.window {
                    ViewState::Fresh
                } else if elapsed <= self.window * DEGRADED_AFTER_MULTIPLE {
                    ViewState::Stale
                } else {
                    ViewState::Degraded
                }
            }
        }
    }

    fn usage_count(&self, id: i32) -> i64 {
        self.usage.load().get(&id).copied().unwrap_or(0)
    }

    /// Optimistically bump the cached count for a just-selected proxy so a
    /// burst of concurrent dispatches doesn't all pile onto the same
    /// least-used proxy before the next refresh lands.
    fn bump(&self, id: i32) {
        let current = self.usage.load();
        let mut next = (**current).clone();
        *next.entry(id).or_insert(0) += 1;
        self.usage.store(std::sync::Arc::new(next));
    }
}

#[async_trait]
impl Selector for RateLimitedSelector {
    async fn select(&self, candidates: &[Proxy], excluded: &HashSet<i32>) -> Result<Proxy, SelectError> {
        let eligible: Vec<&Proxy> = candidates
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .collect();
        if eligible.is_empty() {
            return Err(SelectError::NoUpstreams);
        }

        // A configured cap of 0 pauses this method outright, independent of
        // the usage view's freshness — no need for a working refresh to know
        // the answer is always "at limit".
        if self.max_requests_per_window == 0 {
            return Err(SelectError::AllAtLimit);
        }

        if self.state() == ViewState::Unavailable {
            return Err(SelectError::UsageUnavailable);
        }

        let under_quota: Vec<&&Proxy> = eligible
            .iter()
            .filter(|p| self.usage_count(p.id) < self.max_requests_per_window as i64)
            .collect();

        let chosen = *under_quota
            .into_iter()
            .min_by_key(|p| (self.usage_count(p.id), p.id))
            .ok_or(SelectError::AllAtLimit)?;

        self.bump(chosen.id);
        Ok(chosen.clone())
    }

    fn exclude(&self, _proxy_id: i32) {}

    async fn refresh(&self) -> Result<(), SelectorError> {
        match self
            .usage_source
            .count_recent_all(self.window_seconds, self.count_failed_in_window)
            .await
        {
            Ok(rows) => {
                let map: HashMap<i32, i64> = rows.into_iter().collect();
                self.usage.store(std::sync::Arc::new(map));
                *self.last_refresh.write().expect("lock poisoned") = Some(Instant::now());
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                Err(SelectorError::RefreshFailed(err))
            }
        }
    }

    fn method(&self) -> RotationMethod {
        RotationMethod::RateLimited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rota_db::{ProxyProtocol, ProxyStatus};

    fn proxy(id: i32) -> Proxy {
        Proxy {
            id,
            address: format!("10.0.0.{id}:8080"),
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
            status: ProxyStatus::Active,
            requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0,
            last_check: None,
            last_error: None,
            auto_delete_after_failed_seconds: None,
            invalid_since: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct EmptyUsageSource;

    #[async_trait]
    impl UsageSource for EmptyUsageSource {
        async fn count_recent_all(
            &self,
            _window_seconds: u32,
            _count_failed: bool,
        ) -> Result<Vec<(i32, i64)>, DbError> {
            Ok(Vec::new())
        }
    }

    fn selector() -> RateLimitedSelector {
        RateLimitedSelector::new(EmptyUsageSource, 60, 2, false)
    }

    #[test]
    fn state_is_unavailable_before_first_refresh() {
        let selector = selector();
        assert_eq!(selector.state(), ViewState::Unavailable);
    }

    #[tokio::test]
    async fn fails_with_usage_unavailable_before_first_refresh() {
        let selector = selector();
        let candidates = vec![proxy(1), proxy(2)];
        let excluded = HashSet::new();

        assert_eq!(
            selector.select(&candidates, &excluded).await.unwrap_err(),
            SelectError::UsageUnavailable
        );
    }

    struct FixedUsageSource(Vec<(i32, i64)>);

    #[async_trait]
    impl UsageSource for FixedUsageSource {
        async fn count_recent_all(
            &self,
            _window_seconds: u32,
            _count_failed: bool,
        ) -> Result<Vec<(i32, i64)>, DbError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn ranks_by_usage_once_fresh() {
        let selector = RateLimitedSelector::new(
            FixedUsageSource(vec![(1, 5), (2, 1)]),
            60,
            10,
            false,
        );
        selector.refresh().await.unwrap();
        assert_eq!(selector.state(), ViewState::Fresh);

        let candidates = vec![proxy(1), proxy(2)];
        let picked = selector
            .select(&candidates, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(picked.id, 2, "lower recent usage wins");
    }

    #[tokio::test]
    async fn fails_with_all_at_limit_when_every_candidate_exceeds_quota() {
        let selector =
            RateLimitedSelector::new(FixedUsageSource(vec![(1, 12), (2, 15)]), 60, 10, false);
        selector.refresh().await.unwrap();

        let candidates = vec![proxy(1), proxy(2)];
        let err = selector
            .select(&candidates, &HashSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, SelectError::AllAtLimit);
    }

    #[tokio::test]
    async fn zero_cap_always_reports_all_at_limit() {
        let selector = RateLimitedSelector::new(FixedUsageSource(vec![(1, 0)]), 60, 0, false);
        selector.refresh().await.unwrap();

        let candidates = vec![proxy(1)];
        let err = selector
            .select(&candidates, &HashSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, SelectError::AllAtLimit);
    }

    #[tokio::test]
    async fn fails_with_no_upstreams_when_no_candidates_remain() {
        let selector = selector();
        let err = selector
            .select(&[], &HashSet::new())
            .await
            .unwrap_err();
        assert_eq!(err, SelectError::NoUpstreams);
    }
}
