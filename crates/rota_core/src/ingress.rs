use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use rota_dispatcher::{copy_bidirectional, DispatchError, Dispatcher};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::target::request_target;

/// The ingress listener (C5): accepts client connections, terminates
/// HTTP/1.1, and hands each request to the dispatcher. `CONNECT` requests
/// get an established upstream tunnel spliced in after the 200 response;
/// everything else is a single request/response forwarded in place.
pub struct Ingress {
    listen_addr: String,
    dispatcher: Arc<Dispatcher>,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Ingress {
    pub fn new(listen_addr: String, dispatcher: Arc<Dispatcher>, max_connections: usize, shutdown: CancellationToken) -> Self {
        Self {
            listen_addr,
            dispatcher,
            semaphore: Arc::new(Semaphore::new(max_connections.max(1))),
            shutdown,
        }
    }

    #[instrument(skip(self), fields(listen = %self.listen_addr))]
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        info!(target: "rota::ingress", listen = %self.listen_addr, "ingress listener bound");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    let permit = match self.semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(err) => {
                            error!(target: "rota::ingress", error = %err, "semaphore closed");
                            continue;
                        }
                    };

                    let dispatcher = self.dispatcher.clone();
                    let shutdown = self.shutdown.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(err) = serve_connection(stream, dispatcher, shutdown).await {
                            debug!(target: "rota::ingress", client = %addr, error = %err, "connection ended with error");
                        }
                    });
                }
                _ = self.shutdown.cancelled() => {
                    info!(target: "rota::ingress", "ingress listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        async move { handle(req, dispatcher, shutdown).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await?;
    Ok(())
}

async fn handle(
    req: Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let Some((host, port)) = request_target(&req) else {
        return Ok(text_response(StatusCode::BAD_REQUEST, "missing request target"));
    };

    if req.method() == Method::CONNECT {
        return Ok(handle_connect(req, host, port, dispatcher, shutdown).await);
    }

    match dispatcher.dispatch_http(req, &host, port, &shutdown).await {
        Ok(response) => Ok(response),
        Err(err) => Ok(dispatch_error_response(&err)),
    }
}

async fn handle_connect(
    mut req: Request<Incoming>,
    host: String,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> Response<Full<Bytes>> {
    let connected = dispatcher.dispatch_connect(&host, port, &shutdown).await;

    let (_proxy, upstream) = match connected {
        Ok(pair) => pair,
        Err(err) => return dispatch_error_response(&err),
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let client = TokioIo::new(upgraded);
                if let Err(err) = copy_bidirectional(client, upstream, shutdown).await {
                    warn!(target: "rota::ingress", error = %err, "tunnel copy failed");
                }
            }
            Err(err) => {
                warn!(target: "rota::ingress", error = %err, "client upgrade failed");
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .expect("static response is well-formed")
}

fn dispatch_error_response(err: &DispatchError) -> Response<Full<Bytes>> {
    let status = match err {
        DispatchError::NoProxiesAvailable
        | DispatchError::AllAtLimit
        | DispatchError::UsageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Exhausted(_) => StatusCode::BAD_GATEWAY,
        DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        DispatchError::UpstreamConnectFailed(_) => StatusCode::BAD_GATEWAY,
    };
    text_response(status, &err.to_string())
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(message.to_string())))
        .expect("static response is well-formed")
}
