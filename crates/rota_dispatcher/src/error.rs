use rota_selector::SelectError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no active proxies available")]
    NoProxiesAvailable,

    #[error("every eligible upstream is at its rate limit")]
    AllAtLimit,

    #[error("selector usage view is unavailable")]
    UsageUnavailable,

    #[error("request timed out")]
    Timeout,

    #[error("client cancelled the request")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream proxy connection failed: {0}")]
    UpstreamConnectFailed(String),

    #[error("all attempts exhausted: {0}")]
    Exhausted(String),
}

impl From<SelectError> for DispatchError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoUpstreams => DispatchError::NoProxiesAvailable,
            SelectError::AllAtLimit => DispatchError::AllAtLimit,
            SelectError::UsageUnavailable => DispatchError::UsageUnavailable,
        }
    }
}
