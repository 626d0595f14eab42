use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rota_config::RotationMethod;
use rota_db::Proxy;

use crate::selector::{SelectError, Selector};

/// Cycles through the active candidate list in address order, same
/// counter-and-modulo rotation the teacher uses for upstream server lists.
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Selector for RoundRobinSelector {
    async fn select(&self, candidates: &[Proxy], excluded: &HashSet<i32>) -> Result<Proxy, SelectError> {
        let eligible: Vec<&Proxy> = candidates
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .collect();
        if eligible.is_empty() {
            return Err(SelectError::NoUpstreams);
        }

        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % eligible.len();
        Ok(eligible[idx].clone())
    }

    fn exclude(&self, _proxy_id: i32) {}

    fn method(&self) -> RotationMethod {
        RotationMethod::RoundRobin
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

    #[tokio::test]
    async fn cycles_through_candidates_in_order() {
        let selector = RoundRobinSelector::new();
        let candidates = vec![proxy(1), proxy(2), proxy(3)];
        let excluded = HashSet::new();

        let picked: Vec<i32> = futures_join(&selector, &candidates, &excluded, 4).await;
        assert_eq!(picked, vec![1, 2, 3, 1]);
    }

    #[tokio::test]
    async fn skips_excluded_candidates() {
        let selector = RoundRobinSelector::new();
        let candidates = vec![proxy(1), proxy(2), proxy(3)];
        let mut excluded = HashSet::new();
        excluded.insert(2);

        let picked = selector.select(&candidates, &excluded).await.unwrap();
        assert_ne!(picked.id, 2);
    }

    #[tokio::test]
    async fn fails_with_no_upstreams_when_all_excluded() {
        let selector = RoundRobinSelector::new();
        let candidates = vec![proxy(1)];
        let mut excluded = HashSet::new();
        excluded.insert(1);

        assert_eq!(
            selector.select(&candidates, &excluded).await.unwrap_err(),
            SelectError::NoUpstreams
        );
    }

    async fn futures_join(
        selector: &RoundRobinSelector,
        candidates: &[Proxy],
        excluded: &HashSet<i32>,
        n: usize,
    ) -> Vec<i32> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(selector.select(candidates, excluded).await.unwrap().id);
        }
        out
    }
}
