//! Error taxonomy and HTTP error responses for the waker pipeline

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use thiserror::Error;

/// Errors that can terminate a request at any stage of the pipeline.
///
/// The variants are `Clone` because a wake outcome is delivered through a
/// shared future: every caller attached to the same wake operation receives
/// its own copy of the result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WakeError {
    /// Request arrived without the routing header (or with an invalid value)
    #[error("missing or invalid x-sleep-project header")]
    MissingRoutingHeader,
    /// No config file exists for the project
    #[error("project '{project}' not found (ConfigNotFound)")]
    ConfigNotFound { project: String },
    /// Config file exists but has no usable PROJECT_PORT
    #[error("no port configured for project '{project}'")]
    PortNotConfigured { project: String },
    /// The resume command exited nonzero
    #[error("failed to wake project: {detail}")]
    WakeProcessFailure { detail: String },
    /// The resume command exceeded its timeout and was killed
    #[error("wake timeout exceeded: {detail}")]
    WakeTimeout { detail: String },
    /// The resumed service never accepted a probe
    #[error("service on port {port} not ready (ServiceNotReady)")]
    ServiceNotReady { port: u16 },
    /// The replayed request could not reach the (just-probed) target
    #[error("failed to connect to service: {detail}")]
    ProxyConnectionError { detail: String },
    /// Inbound body exceeded the replay buffer cap
    #[error("request body exceeds {limit} byte limit")]
    BodyTooLarge { limit: usize },
    /// Inbound body stream failed before it was fully buffered
    #[error("failed to read request body: {detail}")]
    BodyReadFailure { detail: String },
}

impl WakeError {
    /// HTTP status this error is surfaced as
    pub fn status_code(&self) -> StatusCode {
        match self {
            WakeError::MissingRoutingHeader => StatusCode::BAD_REQUEST,
            WakeError::ConfigNotFound { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WakeError::PortNotConfigured { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WakeError::WakeProcessFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WakeError::WakeTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WakeError::ServiceNotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WakeError::ProxyConnectionError { .. } => StatusCode::BAD_GATEWAY,
            WakeError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            WakeError::BodyReadFailure { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Stable error code for the X-Wakegate-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            WakeError::MissingRoutingHeader => "MISSING_ROUTING_HEADER",
            WakeError::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            WakeError::PortNotConfigured { .. } => "PORT_NOT_CONFIGURED",
            WakeError::WakeProcessFailure { .. } => "WAKE_PROCESS_FAILURE",
            WakeError::WakeTimeout { .. } => "WAKE_TIMEOUT",
            WakeError::ServiceNotReady { .. } => "SERVICE_NOT_READY",
            WakeError::ProxyConnectionError { .. } => "PROXY_CONNECTION_ERROR",
            WakeError::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            WakeError::BodyReadFailure { .. } => "BODY_READ_FAILURE",
        }
    }
}

/// Build the plain-text error response for a failed request.
///
/// The body carries the human-readable message (the upstream router and
/// curl users see plain text); the X-Wakegate-Error header carries the
/// stable machine-readable code.
pub fn error_response(err: &WakeError) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status = err.status_code();
    let prefix = match status {
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::BAD_GATEWAY => "Bad Gateway",
        StatusCode::PAYLOAD_TOO_LARGE => "Payload Too Large",
        _ => "Service Unavailable",
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .header("X-Wakegate-Error", err.as_header_value())
        .body(
            Full::new(Bytes::from(format!("{}: {}", prefix, err)))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            WakeError::MissingRoutingHeader.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WakeError::ConfigNotFound { project: "alpha".into() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WakeError::WakeTimeout { detail: String::new() }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            WakeError::ProxyConnectionError { detail: String::new() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            WakeError::BodyTooLarge { limit: 1024 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            WakeError::BodyReadFailure { detail: String::new() }.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_header_values() {
        assert_eq!(
            WakeError::MissingRoutingHeader.as_header_value(),
            "MISSING_ROUTING_HEADER"
        );
        assert_eq!(
            WakeError::ServiceNotReady { port: 4001 }.as_header_value(),
            "SERVICE_NOT_READY"
        );
        assert_eq!(
            WakeError::BodyReadFailure { detail: "peer reset".into() }.as_header_value(),
            "BODY_READ_FAILURE"
        );
    }

    #[test]
    fn test_error_response_shape() {
        let err = WakeError::WakeProcessFailure {
            detail: "port in use".into(),
        };
        let response = error_response(&err);

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/plain"
        );
        assert_eq!(
            response.headers().get("X-Wakegate-Error").unwrap(),
            "WAKE_PROCESS_FAILURE"
        );
    }

    #[test]
    fn test_messages_carry_diagnostics() {
        let err = WakeError::WakeProcessFailure {
            detail: "port in use".into(),
        };
        assert!(err.to_string().contains("port in use"));

        let err = WakeError::ConfigNotFound { project: "gamma".into() };
        assert!(err.to_string().contains("ConfigNotFound"));
        assert!(err.to_string().contains("gamma"));
    }
}
