//! Background health checks for `unhealthy` upstreams (C7).
//!
//! Every `probe_interval`, each currently-`unhealthy` proxy is probed with a
//! lightweight HEAD request issued *through* it against a known-reachable
//! target. Three consecutive successes restore `active`. `active` proxies
//! are left alone — the dispatcher is the primary health signal, and probing
//! them too would add synthetic load against the probe target for no
//! benefit (see spec.md §4.7).

use std::time::Duration;

use dashmap::DashMap;
use rota_db::{Proxy, ProxyRepository, ProxyStatus};
use rota_dispatcher::connect_through_proxy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::interval;
use tracing::{debug, info, warn};

const PROMOTE_AFTER_CONSECUTIVE_SUCCESSES: u32 = 3;

pub struct Prober {
    proxy_repo: ProxyRepository,
    probe_interval: Duration,
    probe_timeout: Duration,
    target_host: String,
    target_port: u16,
    consecutive_successes: DashMap<i32, u32>,
}

impl Prober {
    pub fn new(
        proxy_repo: ProxyRepository,
        probe_interval: Duration,
        target_host: String,
        target_port: u16,
    ) -> Self {
        Self {
            proxy_repo,
            probe_interval,
            probe_timeout: Duration::from_secs(10),
            target_host,
            target_port,
            consecutive_successes: DashMap::new(),
        }
    }

    /// Runs the probe loop forever. Intended to be spawned as its own task.
    pub async fn run(&self) {
        let mut ticker = interval(self.probe_interval);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let unhealthy = match self.proxy_repo.list_unhealthy().await {
            Ok(proxies) => proxies,
            Err(err) => {
                warn!(target: "rota::prober", error = %err, "failed to list unhealthy proxies");
                return;
            }
        };

        let still_unhealthy: std::collections::HashSet<i32> =
            unhealthy.iter().map(|p| p.id).collect();
        self.consecutive_successes
            .retain(|id, _| still_unhealthy.contains(id));

        for proxy in unhealthy {
            self.probe_one(&proxy).await;
        }
    }

    async fn probe_one(&self, proxy: &Proxy) {
        let ok = probe_through(proxy, &self.target_host, self.target_port, self.probe_timeout)
            .await
            .is_ok();

        if !ok {
            self.consecutive_successes.remove(&proxy.id);
            debug!(target: "rota::prober", proxy_id = proxy.id, "probe failed");
            return;
        }

        let successes = {
            let mut entry = self.consecutive_successes.entry(proxy.id).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!(target: "rota::prober", proxy_id = proxy.id, successes, "probe succeeded");

        if successes >= PROMOTE_AFTER_CONSECUTIVE_SUCCESSES {
            match self.proxy_repo.set_status(proxy.id, ProxyStatus::Active).await {
                Ok(()) => {
                    self.consecutive_successes.remove(&proxy.id);
                    info!(target: "rota::prober", proxy_id = proxy.id, "restored proxy to active after 3 consecutive probe successes");
                }
                Err(err) => {
                    warn!(target: "rota::prober", proxy_id = proxy.id, error = %err, "failed to restore proxy to active");
                }
            }
        }
    }
}

/// Establishes a tunnel through `proxy` and issues a raw HEAD request
/// against `target_host:target_port`, succeeding on any well-formed HTTP
/// status line (even a 4xx/5xx from the target counts — the probe is
/// testing whether the upstream proxy itself still forwards traffic, not
/// whether the target endpoint is healthy).
async fn probe_through(
    proxy: &Proxy,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<(), rota_dispatcher::DispatchError> {
    let mut stream = connect_through_proxy(proxy, target_host, target_port, timeout).await?;

    let request = format!("HEAD / HTTP/1.1\r\nHost: {target_host}\r\nConnection: close\r\n\r\n");
    tokio::time::timeout(timeout, stream.write_all(request.as_bytes()))
        .await
        .map_err(|_| rota_dispatcher::DispatchError::Timeout)?
        .map_err(|err| rota_dispatcher::DispatchError::UpstreamConnectFailed(err.to_string()))?;

    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| rota_dispatcher::DispatchError::Timeout)?
        .map_err(|err| rota_dispatcher::DispatchError::UpstreamConnectFailed(err.to_string()))?;

    if n == 0 || !buf[..n].starts_with(b"HTTP/1.") {
        return Err(rota_dispatcher::DispatchError::UpstreamConnectFailed(
            "probe target did not return a well-formed HTTP response".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rota_db::ProxyProtocol;
    use tokio::net::TcpListener;

    fn unhealthy_proxy(id: i32, address: String) -> Proxy {
        Proxy {
            id,
            address,
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
            status: ProxyStatus::Unhealthy,
            requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time_ms: 0,
            last_check: None,
            last_error: None,
            auto_delete_after_failed_seconds: None,
            invalid_since: Some(Utc::now()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn probe_through_succeeds_when_proxy_answers_connect_and_head() {
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
            let mut buf = [0u8; 256];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = unhealthy_proxy(1, addr.to_string());
        let result = probe_through(&proxy, "example.com", 80, Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn probe_through_fails_when_upstream_closes_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let proxy = unhealthy_proxy(1, addr.to_string());
        let result = probe_through(&proxy, "example.com", 80, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
