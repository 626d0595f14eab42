use std::collections::HashSet;

use async_trait::async_trait;
use rota_config::RotationMethod;
use rota_db::Proxy;

use crate::selector::{SelectError, Selector};

/// Ranks candidates by lifetime successful requests, ascending, ties broken
/// by id. This optimizes for cold-start spread across the inventory, not
/// live connection count — the name is historical, and nothing here tracks
/// in-flight attempts.
pub struct LeastConnectionsSelector;

impl LeastConnectionsSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LeastConnectionsSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Selector for LeastConnectionsSelector {
    async fn select(&self, candidates: &[Proxy], excluded: &HashSet<i32>) -> Result<Proxy, SelectError> {
        candidates
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .min_by_key(|p| (p.successful_requests, p.id))
            .cloned()
            .ok_or(SelectError::NoUpstreams)
    }

    fn exclude(&self, _proxy_id: i32) {}

    fn method(&self) -> RotationMethod {
        RotationMethod::LeastConnections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rota_db::{ProxyProtocol, ProxyStatus};

    fn proxy(id: i32, successful_requests: i64) -> Proxy {
        Proxy {
            id,
            address: format!("10.0.0.{id}:8080"),
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
            status: ProxyStatus::Active,
            requests: successful_requests,
            successful_requests,
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
    async fn prefers_the_candidate_with_fewer_lifetime_successes() {
        let selector = LeastConnectionsSelector::new();
        let candidates = vec![proxy(1, 40), proxy(2, 5)];

        let picked = selector
            .select(&candidates, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(picked.id, 2);
    }

    #[tokio::test]
    async fn ties_break_by_ascending_id() {
        let selector = LeastConnectionsSelector::new();
        let candidates = vec![proxy(2, 10), proxy(1, 10)];

        let picked = selector
            .select(&candidates, &HashSet::new())
            .await
            .unwrap();
        assert_eq!(picked.id, 1);
    }

    #[tokio::test]
    async fn fails_with_no_upstreams_when_all_excluded() {
        let selector = LeastConnectionsSelector::new();
        let candidates = vec![proxy(1, 0)];
        let mut excluded = HashSet::new();
        excluded.insert(1);

        assert_eq!(
            selector.select(&candidates, &excluded).await.unwrap_err(),
            SelectError::NoUpstreams
        );
    }
}
