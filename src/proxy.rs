//! The HTTP listener and the replay forwarder.
//!
//! Drives the whole pipeline for each inbound request: extract the routing
//! header, buffer the body, wake the project, probe the resolved port, then
//! replay the buffered request and stream the response back. Every stage
//! failure terminates only that request; the listener keeps serving.

use crate::buffer::{BufferedRequest, CaptureError};
use crate::error::{error_response, WakeError};
use crate::probe::ReadinessProbe;
use crate::wake::WakeOrchestrator;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Routing header set by the upstream router; carries the project name
pub const ROUTING_HEADER: &str = "x-sleep-project";
/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";

/// Maximum accepted project name length
const MAX_PROJECT_NAME_LEN: usize = 64;

/// Shared per-request context
struct Inner {
    orchestrator: Arc<WakeOrchestrator>,
    probe: ReadinessProbe,
    max_body_bytes: usize,
    /// Pooled upstream client; replayed requests reuse connections per port
    client: Client<HttpConnector, Full<Bytes>>,
}

/// The wake-on-request proxy server.
pub struct WakerServer {
    listener: TcpListener,
    inner: Arc<Inner>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WakerServer {
    pub async fn bind(
        addr: SocketAddr,
        orchestrator: Arc<WakeOrchestrator>,
        probe: ReadinessProbe,
        max_body_bytes: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(10)
            .build(connector);

        Ok(Self {
            listener,
            inner: Arc::new(Inner {
                orchestrator,
                probe,
                max_body_bytes,
                client,
            }),
            shutdown_rx,
        })
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, "Waker listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let inner = Arc::clone(&self.inner);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, inner).await {
                                    debug!(peer = %peer, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Waker shutting down, listener closing");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, inner: Arc<Inner>) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let inner = Arc::clone(&inner);
        async move { handle_request(req, inner).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Request lifecycle: Received -> Buffered -> Waking -> Probing -> Proxying.
async fn handle_request(
    mut req: Request<Incoming>,
    inner: Arc<Inner>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(X_REQUEST_ID, value);
    }

    // Received: the routing header names the sleeping project
    let project = match extract_project(&req) {
        Some(p) => p,
        None => {
            warn!(request_id, "Request without a valid routing header");
            return Ok(error_response(&WakeError::MissingRoutingHeader));
        }
    };

    debug!(
        project,
        method = %req.method(),
        uri = %req.uri(),
        request_id,
        "Request for sleeping project"
    );

    // Buffered: the inbound stream is single-pass, so capture everything
    // before the (potentially slow) wake begins
    let buffered = match BufferedRequest::capture(req, inner.max_body_bytes).await {
        Ok(b) => b,
        Err(CaptureError::TooLarge { limit }) => {
            warn!(project, request_id, limit, "Request body exceeds buffer cap");
            return Ok(error_response(&WakeError::BodyTooLarge { limit }));
        }
        Err(CaptureError::Read(e)) => {
            warn!(project, request_id, error = %e, "Failed to read request body");
            return Ok(error_response(&WakeError::BodyReadFailure {
                detail: e.to_string(),
            }));
        }
    };

    // Waking
    let port = match inner.orchestrator.wake(&project).await {
        Ok(port) => port,
        Err(e) => {
            error!(project, request_id, stage = "wake", error = %e, "Request failed");
            return Ok(error_response(&e));
        }
    };

    // Probing: the resume command reporting success does not mean the
    // service is listening yet
    if let Err(e) = inner.probe.await_ready(port).await {
        error!(project, port, request_id, stage = "probe", error = %e, "Request failed");
        return Ok(error_response(&e));
    }

    // Proxying: a non-2xx upstream status still completes the pipeline
    match forward(&inner.client, &buffered, port).await {
        Ok(response) => {
            debug!(
                project,
                port,
                request_id,
                status = %response.status(),
                "Replayed request to awakened service"
            );
            Ok(response)
        }
        Err(e) => {
            error!(project, port, request_id, stage = "proxy", error = %e, "Request failed");
            Ok(error_response(&e))
        }
    }
}

/// Replay a buffered request against the awakened service.
///
/// Headers go through verbatim except the routing header (stripped) and the
/// framing headers: content-length is rewritten to the buffered body's exact
/// byte length and any transfer-encoding from the original request dropped,
/// since the replay is never chunked.
pub async fn forward(
    client: &Client<HttpConnector, Full<Bytes>>,
    buffered: &BufferedRequest,
    port: u16,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, WakeError> {
    let uri = format!("http://127.0.0.1:{}{}", port, buffered.path_and_query);

    let mut req = Request::builder()
        .method(buffered.method.clone())
        .uri(&uri)
        .body(Full::new(buffered.body.clone()))
        .map_err(|e| WakeError::ProxyConnectionError {
            detail: format!("failed to build replay request: {}", e),
        })?;

    let headers = req.headers_mut();
    for (name, value) in buffered.headers.iter() {
        if skip_on_replay(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(buffered.body.len()));

    let response = client
        .request(req)
        .await
        .map_err(|e| WakeError::ProxyConnectionError {
            detail: e.to_string(),
        })?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.boxed()))
}

/// Headers that must not be replayed as-is
fn skip_on_replay(name: &HeaderName) -> bool {
    name.as_str() == ROUTING_HEADER || *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING
}

/// Extract and validate the project name from the routing header.
///
/// The name ends up in a config-store path and on the resume command line,
/// so anything outside a short allowlisted alphabet is rejected outright.
fn extract_project<B>(req: &Request<B>) -> Option<String> {
    let name = req.headers().get(ROUTING_HEADER)?.to_str().ok()?;

    if name.is_empty() || name.len() > MAX_PROJECT_NAME_LEN {
        return None;
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return None;
    }

    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::CONTENT_TYPE;
    use hyper::Method;

    fn request_with_project(value: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri("/")
            .header(ROUTING_HEADER, value)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[test]
    fn test_extract_project_accepts_typical_names() {
        for name in ["alpha", "my-app", "svc_2", "app.staging"] {
            assert_eq!(
                extract_project(&request_with_project(name)).as_deref(),
                Some(name)
            );
        }
    }

    #[test]
    fn test_extract_project_rejects_invalid_names() {
        assert!(extract_project(&request_with_project("")).is_none());
        assert!(extract_project(&request_with_project("../escape")).is_none());
        assert!(extract_project(&request_with_project("has space")).is_none());
        assert!(extract_project(&request_with_project("semi;colon")).is_none());
        assert!(extract_project(&request_with_project(&"a".repeat(65))).is_none());
    }

    #[test]
    fn test_extract_project_requires_header() {
        let req = Request::builder()
            .uri("/")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(extract_project(&req).is_none());
    }

    #[test]
    fn test_skip_on_replay() {
        assert!(skip_on_replay(&HeaderName::from_static(ROUTING_HEADER)));
        assert!(skip_on_replay(&CONTENT_LENGTH));
        assert!(skip_on_replay(&TRANSFER_ENCODING));
        assert!(!skip_on_replay(&HeaderName::from_static("x-custom")));
        assert!(!skip_on_replay(&CONTENT_TYPE));
    }
}
