use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::header::PROXY_AUTHORIZATION;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rota_db::Proxy;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::DispatchError;
use crate::headers::{is_hop_by_hop_header, VIA_TOKEN};

/// Forwards one absolute-form HTTP request to `target_host:target_port`
/// through `proxy`, treating `proxy.address` as an HTTP proxy that accepts
/// the request directly (no CONNECT handshake — that path is only used for
/// HTTPS tunneling).
pub async fn forward_http(
    proxy: &Proxy,
    parts: &Parts,
    body: Bytes,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<Response<Full<Bytes>>, DispatchError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let absolute_uri = if target_port == 80 {
        format!("http://{target_host}{path_and_query}")
    } else {
        format!("http://{target_host}:{target_port}{path_and_query}")
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect(&proxy.address))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;

    let mut builder = Request::builder().method(parts.method.clone()).uri(&absolute_uri);
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }
    builder = builder.header("Via", VIA_TOKEN);

    if let (Some(user), Some(password)) = (&proxy.username, &proxy.password) {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        builder = builder.header(PROXY_AUTHORIZATION, format!("Basic {encoded}"));
    }

    let request = builder
        .body(Full::new(body))
        .map_err(|err| DispatchError::InvalidRequest(err.to_string()))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(error = %err, "upstream connection ended");
        }
    });

    let response = tokio::time::timeout(timeout, sender.send_request(request))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;

    let (parts, body) = response.into_parts();
    let body_bytes = body
        .collect()
        .await
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?
        .to_bytes();

    Ok(Response::from_parts(parts, Full::new(body_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use http::Request as HttpRequest;
    use rota_db::{ProxyProtocol, ProxyStatus};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn proxy(address: String) -> Proxy {
        Proxy {
            id: 1,
            address,
            protocol: ProxyProtocol::Http,
            username: Some("alice".into()),
            password: Some("hunter2".into()),
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
    async fn forwards_absolute_uri_with_proxy_auth_and_strips_hop_by_hop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                .await
                .unwrap();
            request
        });

        let request = HttpRequest::builder()
            .method("GET")
            .uri("/status")
            .header("Connection", "keep-alive")
            .header("X-Custom", "value")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();

        let proxy = proxy(addr.to_string());
        let response = forward_http(
            &proxy,
            &parts,
            Bytes::new(),
            "example.com",
            80,
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), 200);

        let sent = server.await.unwrap();
        assert!(sent.contains("GET http://example.com/status HTTP/1.1"));
        assert!(sent.contains("x-custom: value") || sent.contains("X-Custom: value"));
        assert!(sent.contains("Proxy-Authorization: Basic"));
        assert!(!sent.to_lowercase().contains("connection: keep-alive"));
    }
}
