mod error;
mod least_connections;
mod random;
mod rate_limited;
mod round_robin;
mod selector;
mod watcher;

pub use error::SelectorError;
pub use least_connections::LeastConnectionsSelector;
pub use random::RandomSelector;
pub use rate_limited::{RateLimitedSelector, UsageSource, ViewState};
pub use round_robin::RoundRobinSelector;
pub use selector::{SelectError, Selector};
pub use watcher::{build_selector, SettingsWatcher};
