use std::collections::HashSet;

use async_trait::async_trait;
use rota_config::RotationMethod;
use rota_db::Proxy;
use thiserror::Error;

use crate::error::SelectorError;

/// Why a `select` call produced no candidate. Kept distinct from
/// `SelectorError` (which covers background `refresh` failures) because the
/// dispatcher and, beyond it, the client need to tell these apart: each maps
/// to its own HTTP status rather than a single generic "no proxy" failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    /// No active, non-excluded proxy exists in the inventory at all.
    #[error("no active upstreams available")]
    NoUpstreams,
    /// Active candidates exist but every one of them is at or over its
    /// rate-limit quota for the current window.
    #[error("every eligible upstream is at its rate limit")]
    AllAtLimit,
    /// The rate-limited selector's usage view is too stale to trust and a
    /// refresh hasn't landed yet.
    #[error("usage view is unavailable")]
    UsageUnavailable,
}

/// The capability set every rotation policy exposes: choose a candidate,
/// release bookkeeping tied to one, and refresh whatever internal state the
/// policy derives from the request log. No inheritance hierarchy required —
/// the dispatcher only ever sees `Arc<dyn Selector>`.
#[async_trait]
pub trait Selector: Send + Sync {
    /// Choose one candidate from `candidates`, skipping any id present in
    /// `excluded` (the proxies already tried earlier in this dispatch).
    async fn select(&self, candidates: &[Proxy], excluded: &HashSet<i32>) -> Result<Proxy, SelectError>;

    /// Release any selection bookkeeping tied to `proxy_id` once a dispatch
    /// attempt against it has concluded (success or failure). A no-op for
    /// policies that keep no per-attempt state.
    fn exclude(&self, proxy_id: i32);

    /// Refresh internal state derived from the request log. A no-op for
    /// every policy except the rate-limited one, which uses this to pull a
    /// fresh usage view.
    async fn refresh(&self) -> Result<(), SelectorError> {
        Ok(())
    }

    fn method(&self) -> RotationMethod;
}
