mod dispatcher;
mod error;
mod forward;
mod headers;
mod transport;
mod tunnel;

pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use forward::forward_http;
pub use headers::is_hop_by_hop_header;
pub use transport::connect_through_proxy;
pub use tunnel::copy_bidirectional;
