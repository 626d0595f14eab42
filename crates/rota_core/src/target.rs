use http::{Method, Request};

/// Extracts the `(host, port)` a client request is aimed at.
///
/// `CONNECT` requests carry it in authority-form (`example.com:443`);
/// everything else is expected in absolute-form (`GET http://example.com/x
/// HTTP/1.1`), per RFC 7230 §5.3.2 for requests sent to a proxy. Falls back
/// to the `Host` header for origin-form requests a client sends anyway.
pub fn request_target<B>(req: &Request<B>) -> Option<(String, u16)> {
    if req.method() == Method::CONNECT {
        let authority = req.uri().authority()?;
        let host = authority.host().to_string();
        let port = authority.port_u16().unwrap_or(443);
        return Some((host, port));
    }

    if let Some(authority) = req.uri().authority() {
        let host = authority.host().to_string();
        let port = authority.port_u16().unwrap_or(80);
        return Some((host, port));
    }

    let host_header = req.headers().get(http::header::HOST)?.to_str().ok()?;
    split_host_port(host_header)
}

fn split_host_port(host_header: &str) -> Option<(String, u16)> {
    match host_header.rsplit_once(':') {
        Some((host, port)) => port.parse().ok().map(|port| (host.to_string(), port)),
        None => Some((host_header.to_string(), 80)),
    }
}
