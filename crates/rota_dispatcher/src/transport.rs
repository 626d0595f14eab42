use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rota_db::{Proxy, ProxyProtocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::DispatchError;

/// Connects through an upstream proxy and establishes a tunnel to
/// `target_host:target_port`, speaking whatever handshake the proxy's
/// protocol requires. The returned stream is the raw tunnel: bytes written
/// to it reach the target, bytes read from it come from the target.
pub async fn connect_through_proxy(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<TcpStream, DispatchError> {
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&proxy.address))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;

    match proxy.protocol {
        ProxyProtocol::Http | ProxyProtocol::Https => {
            http_connect_handshake(&mut stream, proxy, target_host, target_port, timeout).await?
        }
        ProxyProtocol::Socks4 => {
            socks4_handshake(&mut stream, proxy, target_host, target_port, timeout).await?
        }
        ProxyProtocol::Socks5 => {
            socks5_handshake(&mut stream, proxy, target_host, target_port, timeout).await?
        }
    }

    Ok(stream)
}

async fn http_connect_handshake(
    stream: &mut TcpStream,
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let mut request = format!(
        "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
    );
    if let (Some(user), Some(password)) = (&proxy.username, &proxy.password) {
        let encoded = STANDARD.encode(format!("{user}:{password}"));
        request.push_str(&format!("Proxy-Authorization: Basic {encoded}\r\n"));
    }
    request.push_str("\r\n");

    tokio::time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;

    let status_line = tokio::time::timeout(timeout, read_status_line(stream))
        .await
        .map_err(|_| DispatchError::Timeout)??;

    if !status_line.contains(" 200 ") && !status_line.ends_with(" 200") {
        return Err(DispatchError::UpstreamConnectFailed(format!(
            "upstream proxy refused CONNECT: {status_line}"
        )));
    }
    Ok(())
}

/// Reads the status line and discards headers up to the blank line that
/// ends a CONNECT response, leaving the stream positioned at the start of
/// the tunneled bytes.
async fn read_status_line(stream: &mut TcpStream) -> Result<String, DispatchError> {
    const MAX_HEADER_BYTES: usize = 8 * 1024;
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];

    loop {
        if buf.len() >= MAX_HEADER_BYTES {
            return Err(DispatchError::UpstreamConnectFailed(
                "upstream proxy CONNECT response headers too large".into(),
            ));
        }

        let n = stream
            .read(&mut byte)
            .await
            .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;
        if n == 0 {
            return Err(DispatchError::UpstreamConnectFailed(
                "upstream proxy closed connection during CONNECT handshake".into(),
            ));
        }

        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let status_line = text.lines().next().unwrap_or_default().to_string();
    Ok(status_line)
}

const SOCKS4_VERSION: u8 = 0x04;
const SOCKS4_CONNECT: u8 = 0x01;
const SOCKS4_GRANTED: u8 = 0x5A;

/// SOCKS4a handshake: DSTIP is set to the `0.0.0.x` invalid-address sentinel
/// and the hostname is appended, null-terminated, after the user id — target
/// hosts here are never pre-resolved, so plain SOCKS4 (IPv4-only) isn't an
/// option.
async fn socks4_handshake(
    stream: &mut TcpStream,
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let user = proxy.username.as_deref().unwrap_or_default();

    let mut request = vec![SOCKS4_VERSION, SOCKS4_CONNECT];
    request.extend_from_slice(&target_port.to_be_bytes());
    request.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    request.extend_from_slice(user.as_bytes());
    request.push(0x00);
    request.extend_from_slice(target_host.as_bytes());
    request.push(0x00);
    send(stream, &request, timeout).await?;

    let mut reply = [0u8; 8];
    recv_exact(stream, &mut reply, timeout).await?;
    if reply[1] != SOCKS4_GRANTED {
        return Err(DispatchError::UpstreamConnectFailed(format!(
            "SOCKS4 CONNECT rejected with reply code {}",
            reply[1]
        )));
    }
    Ok(())
}

const SOCKS5_VERSION: u8 = 0x05;

async fn socks5_handshake(
    stream: &mut TcpStream,
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let has_creds = proxy.username.is_some() && proxy.password.is_some();
    let methods: &[u8] = if has_creds { &[0x00, 0x02] } else { &[0x00] };

    let greeting = [&[SOCKS5_VERSION, methods.len() as u8][..], methods].concat();
    send(stream, &greeting, timeout).await?;

    let mut reply = [0u8; 2];
    recv_exact(stream, &mut reply, timeout).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(DispatchError::UpstreamConnectFailed(
            "upstream proxy is not a SOCKS5 server".into(),
        ));
    }

    match reply[1] {
        0x00 => {}
        0x02 => authenticate_socks5(stream, proxy, timeout).await?,
        _ => {
            return Err(DispatchError::UpstreamConnectFailed(
                "upstream proxy offered no acceptable SOCKS5 auth method".into(),
            ))
        }
    }

    let mut request = vec![SOCKS5_VERSION, 0x01, 0x00, 0x03, target_host.len() as u8];
    request.extend_from_slice(target_host.as_bytes());
    request.extend_from_slice(&target_port.to_be_bytes());
    send(stream, &request, timeout).await?;

    let mut header = [0u8; 4];
    recv_exact(stream, &mut header, timeout).await?;
    if header[1] != 0x00 {
        return Err(DispatchError::UpstreamConnectFailed(format!(
            "SOCKS5 CONNECT rejected with reply code {}",
            header[1]
        )));
    }

    // Discard the bound address the server echoes back (format depends on
    // header[3]: 1 = IPv4 (4 bytes), 3 = domain (length-prefixed), 4 = IPv6).
    match header[3] {
        0x01 => discard(stream, 4 + 2, timeout).await?,
        0x04 => discard(stream, 16 + 2, timeout).await?,
        0x03 => {
            let mut len_buf = [0u8; 1];
            recv_exact(stream, &mut len_buf, timeout).await?;
            discard(stream, len_buf[0] as usize + 2, timeout).await?
        }
        _ => {
            return Err(DispatchError::UpstreamConnectFailed(
                "unrecognized SOCKS5 bound address type".into(),
            ))
        }
    }

    Ok(())
}

async fn authenticate_socks5(
    stream: &mut TcpStream,
    proxy: &Proxy,
    timeout: Duration,
) -> Result<(), DispatchError> {
    let user = proxy.username.as_deref().unwrap_or_default();
    let password = proxy.password.as_deref().unwrap_or_default();

    let mut auth = vec![0x01u8, user.len() as u8];
    auth.extend_from_slice(user.as_bytes());
    auth.push(password.len() as u8);
    auth.extend_from_slice(password.as_bytes());
    send(stream, &auth, timeout).await?;

    let mut reply = [0u8; 2];
    recv_exact(stream, &mut reply, timeout).await?;
    if reply[1] != 0x00 {
        return Err(DispatchError::UpstreamConnectFailed(
            "SOCKS5 authentication rejected".into(),
        ));
    }
    Ok(())
}

async fn send(stream: &mut TcpStream, bytes: &[u8], timeout: Duration) -> Result<(), DispatchError> {
    tokio::time::timeout(timeout, stream.write_all(bytes))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))
}

async fn recv_exact(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), DispatchError> {
    tokio::time::timeout(timeout, stream.read_exact(buf))
        .await
        .map_err(|_| DispatchError::Timeout)?
        .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))
}

async fn discard(stream: &mut TcpStream, len: usize, timeout: Duration) -> Result<(), DispatchError> {
    let mut buf = vec![0u8; len];
    recv_exact(stream, &mut buf, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rota_db::ProxyStatus;
    use tokio::net::TcpListener;

    fn proxy(address: String, protocol: ProxyProtocol) -> Proxy {
        Proxy {
            id: 1,
            address,
            protocol,
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
    async fn http_connect_handshake_succeeds_on_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Http);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn http_connect_handshake_fails_on_non_200() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Http);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn socks4_handshake_succeeds_on_granted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(&[0x00, 0x5A, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Socks4);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn socks4_handshake_fails_on_rejected_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(&[0x00, 0x5B, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Socks4);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn socks5_handshake_succeeds_with_no_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut greeting = [0u8; 2];
            stream.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            stream.read_exact(&mut methods).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut header = [0u8; 5];
            stream.read_exact(&mut header).await.unwrap();
            let mut rest = vec![0u8; header[4] as usize + 2];
            stream.read_exact(&mut rest).await.unwrap();

            stream
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Socks5);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn socks5_handshake_fails_on_rejected_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut greeting = [0u8; 2];
            stream.read_exact(&mut greeting).await.unwrap();
            let mut methods = vec![0u8; greeting[1] as usize];
            stream.read_exact(&mut methods).await.unwrap();
            stream.write_all(&[0x05, 0x00]).await.unwrap();

            let mut header = [0u8; 5];
            stream.read_exact(&mut header).await.unwrap();
            let mut rest = vec![0u8; header[4] as usize + 2];
            stream.read_exact(&mut rest).await.unwrap();

            stream
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let proxy = proxy(addr.to_string(), ProxyProtocol::Socks5);
        let result = connect_through_proxy(&proxy, "example.com", 443, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
