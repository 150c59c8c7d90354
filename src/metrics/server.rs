//! Metrics and Health Server
//!
//! One HTTP/1 listener serving `/metrics`, `/healthz` (`/livez`) and
//! `/readyz`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::collector::GatewayMetrics;
use crate::error::{Error, Result};

/// Readiness flag flipped by the owner of the served components
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Bind the server socket
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))
}

/// Accept connections until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<GatewayMetrics>,
    health: Arc<HealthState>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics server listening on {}", addr);
    }

    loop {
        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Metrics server stopping");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        let health = health.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = route(req.uri().path(), &metrics, &health);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn route(path: &str, metrics: &GatewayMetrics, health: &HealthState) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
                response
            }
            Err(e) => {
                error!("Failed to render metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
            }
        },
        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
        "/readyz" if health.is_ready() => text_response(StatusCode::OK, "ok"),
        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}
