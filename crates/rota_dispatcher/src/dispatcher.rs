use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::request::Parts;
use hyper::{Request, Response};
use hyper::body::Incoming;
use http_body_util::{BodyExt, Full};
use rota_config::RotationSettings;
use rota_db::{LogRepository, NewRequestRecord, Proxy, ProxyRepository, ProxyStatus};
use rota_selector::Selector;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::DispatchError;
use crate::forward::forward_http;
use crate::transport::connect_through_proxy;

/// The dispatcher (C4): runs the per-request retry/fallback loop against
/// the currently active selector, recording one request-log row per
/// attempt in attempt order before moving to the next candidate.
pub struct Dispatcher {
    selector_handle: Arc<ArcSwap<dyn Selector>>,
    settings_handle: Arc<ArcSwap<RotationSettings>>,
    proxy_repo: ProxyRepository,
    log_repo: LogRepository,
}

impl Dispatcher {
    pub fn new(
        selector_handle: Arc<ArcSwap<dyn Selector>>,
        settings_handle: Arc<ArcSwap<RotationSettings>>,
        proxy_repo: ProxyRepository,
        log_repo: LogRepository,
    ) -> Self {
        Self {
            selector_handle,
            settings_handle,
            proxy_repo,
            log_repo,
        }
    }

    fn settings(&self) -> Arc<RotationSettings> {
        self.settings_handle.load_full()
    }

    fn selector(&self) -> Arc<dyn Selector> {
        self.selector_handle.load_full()
    }

    async fn next_candidate(
        &self,
        selector: &Arc<dyn Selector>,
        tried: &HashSet<i32>,
    ) -> Result<Proxy, DispatchError> {
        let candidates = self
            .proxy_repo
            .list_active()
            .await
            .map_err(|err| DispatchError::UpstreamConnectFailed(err.to_string()))?;
        selector
            .select(&candidates, tried)
            .await
            .map_err(DispatchError::from)
    }

    async fn record(
        &self,
        proxy_id: Option<i32>,
        method: &str,
        target_host: &str,
        status_code: Option<i32>,
        success: bool,
        duration_ms: i32,
        error: Option<String>,
    ) {
        let record = NewRequestRecord {
            proxy_id,
            method: method.to_string(),
            target_host: target_host.to_string(),
            status_code,
            success,
            duration_ms,
            error,
        };
        if let Err(err) = self.log_repo.append(&record).await {
            warn!(target: "rota::dispatcher", error = %err, "failed to append request record");
        }
    }

    /// Records dispatch-level lifetime counters against `proxy_id` and
    /// retires it to `unhealthy` on failure when `remove_unhealthy` is set.
    async fn record_attempt_outcome(
        &self,
        proxy_id: i32,
        success: bool,
        duration_ms: i32,
        error: Option<&str>,
        remove_unhealthy: bool,
    ) {
        if let Err(err) = self
            .proxy_repo
            .record_attempt(proxy_id, success, duration_ms, error)
            .await
        {
            warn!(target: "rota::dispatcher", proxy_id, error = %err, "failed to record proxy attempt");
        }

        if !success && remove_unhealthy {
            if let Err(err) = self.proxy_repo.set_status(proxy_id, ProxyStatus::Unhealthy).await {
                warn!(target: "rota::dispatcher", proxy_id, error = %err, "failed to retire unhealthy proxy");
            } else {
                info!(target: "rota::dispatcher", proxy_id, "retired proxy to unhealthy after failed attempt");
            }
        }
    }

    /// Establishes a tunnel to `target_host:target_port` through a rotated
    /// upstream proxy, retrying per `settings.retries`/`settings.fallback`.
    #[instrument(skip(self, cancel), fields(target = %format!("{target_host}:{target_port}")))]
    pub async fn dispatch_connect(
        &self,
        target_host: &str,
        target_port: u16,
        cancel: &CancellationToken,
    ) -> Result<(Proxy, TcpStream), DispatchError> {
        let settings = self.settings();
        let selector = self.selector();
        let mut tried = HashSet::new();
        let mut last_error = None;

        for attempt in 0..settings.retries.max(1) {
            if cancel.is_cancelled() {
                self.record(
                    None,
                    "CONNECT",
                    target_host,
                    None,
                    false,
                    0,
                    Some("client cancelled".to_string()),
                )
                .await;
                return Err(DispatchError::Cancelled);
            }

            let proxy = match self.next_candidate(&selector, &tried).await {
                Ok(p) => p,
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            };

            let start = Instant::now();
            let result = connect_through_proxy(&proxy, target_host, target_port, settings.timeout()).await;
            let duration_ms = start.elapsed().as_millis() as i32;

            tried.insert(proxy.id);
            selector.exclude(proxy.id);

            match result {
                Ok(stream) => {
                    self.record(
                        Some(proxy.id),
                        "CONNECT",
                        target_host,
                        Some(200),
                        true,
                        duration_ms,
                        None,
                    )
                    .await;
                    self.record_attempt_outcome(proxy.id, true, duration_ms, None, false)
                        .await;
                    return Ok((proxy, stream));
                }
                Err(err) => {
                    self.record(
                        Some(proxy.id),
                        "CONNECT",
                        target_host,
                        None,
                        false,
                        duration_ms,
                        Some(err.to_string()),
                    )
                    .await;
                    self.record_attempt_outcome(
                        proxy.id,
                        false,
                        duration_ms,
                        Some(&err.to_string()),
                        settings.remove_unhealthy,
                    )
                    .await;
                    warn!(target: "rota::dispatcher", proxy_id = proxy.id, attempt, error = %err, "CONNECT attempt failed");
                    last_error = Some(err);
                    if !settings.fallback {
                        break;
                    }
                }
            }
        }

        Err(DispatchError::Exhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "no proxies available".into()),
        ))
    }

    /// Forwards one plain HTTP request through a rotated upstream proxy,
    /// retrying on transport error or 5xx per `settings.retries`/
    /// `settings.fallback`. A non-retriable response (2xx/3xx/4xx) is
    /// returned to the client immediately; if retries are exhausted while
    /// fallback is enabled, the last 5xx response seen is returned instead
    /// of a synthetic error.
    #[instrument(skip(self, req, cancel), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn dispatch_http(
        &self,
        req: Request<Incoming>,
        target_host: &str,
        target_port: u16,
        cancel: &CancellationToken,
    ) -> Result<Response<Full<Bytes>>, DispatchError> {
        let settings = self.settings();
        let selector = self.selector();
        let (parts, body): (Parts, _) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|err| DispatchError::InvalidRequest(err.to_string()))?
            .to_bytes();

        let method = parts.method.clone();
        let mut tried = HashSet::new();
        let mut last_error = None;
        let mut last_response: Option<Response<Full<Bytes>>> = None;

        for attempt in 0..settings.retries.max(1) {
            if cancel.is_cancelled() {
                self.record(
                    None,
                    method.as_str(),
                    target_host,
                    None,
                    false,
                    0,
                    Some("client cancelled".to_string()),
                )
                .await;
                return Err(DispatchError::Cancelled);
            }

            let proxy = match self.next_candidate(&selector, &tried).await {
                Ok(p) => p,
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            };

            let start = Instant::now();
            let result = forward_http(
                &proxy,
                &parts,
                body_bytes.clone(),
                target_host,
                target_port,
                settings.timeout(),
            )
            .await;
            let duration_ms = start.elapsed().as_millis() as i32;

            tried.insert(proxy.id);
            selector.exclude(proxy.id);

            match result {
                Ok(response) => {
                    let status = response.status();
                    let success = status.is_success() || status.is_redirection();
                    let retriable = status.is_server_error();

                    self.record(
                        Some(proxy.id),
                        method.as_str(),
                        target_host,
                        Some(status.as_u16() as i32),
                        success,
                        duration_ms,
                        if success { None } else { Some(format!("upstream status {status}")) },
                    )
                    .await;
                    self.record_attempt_outcome(
                        proxy.id,
                        !retriable,
                        duration_ms,
                        if retriable { Some(status.as_str()) } else { None },
                        settings.remove_unhealthy && retriable,
                    )
                    .await;

                    if !retriable || !settings.fallback {
                        return Ok(response);
                    }

                    warn!(target: "rota::dispatcher", proxy_id = proxy.id, attempt, %status, "HTTP attempt returned a retriable 5xx");
                    last_error = Some(DispatchError::Exhausted(format!("upstream returned {status}")));
                    last_response = Some(response);
                }
                Err(err) => {
                    self.record(
                        Some(proxy.id),
                        method.as_str(),
                        target_host,
                        None,
                        false,
                        duration_ms,
                        Some(err.to_string()),
                    )
                    .await;
                    self.record_attempt_outcome(
                        proxy.id,
                        false,
                        duration_ms,
                        Some(&err.to_string()),
                        settings.remove_unhealthy,
                    )
                    .await;
                    warn!(target: "rota::dispatcher", proxy_id = proxy.id, attempt, error = %err, "HTTP attempt failed");
                    last_error = Some(err);
                    if !settings.fallback {
                        break;
                    }
                }
            }
        }

        if let Some(response) = last_response {
            return Ok(response);
        }

        Err(DispatchError::Exhausted(
            last_error.map(|e| e.to_string()).unwrap_or_else(|| "no proxies available".into()),
        ))
    }
}
