mod ingress;
mod target;

pub use ingress::Ingress;
pub use target::request_target;
