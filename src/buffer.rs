//! Full in-memory capture of the inbound request.
//!
//! The inbound transport stream is single-pass. Wake plus probe can take
//! tens of seconds, and the request has to be replayed against the target
//! afterwards, so the whole body is buffered up front, before resumption
//! begins. A configurable cap keeps a single request from buffering
//! unbounded memory; oversized bodies are rejected before any wake starts.

use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Request};

/// An inbound request captured in full: immutable after capture, consumed
/// exactly once by the forwarding half of the proxy.
#[derive(Debug, Clone)]
pub struct BufferedRequest {
    pub method: Method,
    /// Original path and query, replayed verbatim
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Why a capture failed.
#[derive(Debug)]
pub enum CaptureError {
    /// Body exceeded the configured cap
    TooLarge { limit: usize },
    /// The client connection failed mid-body
    Read(Box<dyn std::error::Error + Send + Sync>),
}

impl BufferedRequest {
    /// Buffer an inbound request, enforcing the body size cap.
    pub async fn capture<B>(req: Request<B>, max_bytes: usize) -> Result<Self, CaptureError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();

        let collected = Limited::new(body, max_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    CaptureError::TooLarge { limit: max_bytes }
                } else {
                    CaptureError::Read(e)
                }
            })?;

        Ok(Self::from_parts(parts, collected.to_bytes()))
    }

    fn from_parts(parts: Parts, body: Bytes) -> Self {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        Self {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        }
    }
}
