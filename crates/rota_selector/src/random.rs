use std::collections::HashSet;

use async_trait::async_trait;
use rand::Rng;
use rota_config::RotationMethod;
use rota_db::Proxy;

use crate::selector::{SelectError, Selector};

/// Picks a uniformly random eligible candidate per call.
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Selector for RandomSelector {
    async fn select(&self, candidates: &[Proxy], excluded: &HashSet<i32>) -> Result<Proxy, SelectError> {
        let eligible: Vec<&Proxy> = candidates
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .collect();
        if eligible.is_empty() {
            return Err(SelectError::NoUpstreams);
        }

        let idx = rand::thread_rng().gen_range(0..eligible.len());
        Ok(eligible[idx].clone())
    }

    fn exclude(&self, _proxy_id: i32) {}

    fn method(&self) -> RotationMethod {
        RotationMethod::Random
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
    async fn always_picks_the_only_eligible_candidate() {
        let selector = RandomSelector::new();
        let candidates = vec![proxy(1)];
        let excluded = HashSet::new();
        let picked = selector.select(&candidates, &excluded).await.unwrap();
        assert_eq!(picked.id, 1);
    }

    #[tokio::test]
    async fn fails_with_no_upstreams_with_no_candidates() {
        let selector = RandomSelector::new();
        assert_eq!(
            selector.select(&[], &HashSet::new()).await.unwrap_err(),
            SelectError::NoUpstreams
        );
    }
}
