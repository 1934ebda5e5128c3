//! Readiness probing for freshly-resumed services.
//!
//! A resume command reporting success only means the process was launched;
//! it may still be mid-initialization and not yet listening. Each probe is a
//! bare HEAD request over a fresh TCP connection: any response that comes
//! back, whatever its status code, proves the listener is accepting traffic.
//! Application-level health is deliberately not checked.

use crate::error::WakeError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub max_attempts: u32,
    /// Per-attempt bound covering connect, write, and first response bytes
    pub attempt_timeout: Duration,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            attempt_timeout: Duration::from_millis(2000),
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ReadinessProbe {
    /// Wait until the service on `port` answers a probe, retrying up to
    /// `max_attempts` times. Fails with `ServiceNotReady` on exhaustion.
    pub async fn await_ready(&self, port: u16) -> Result<(), WakeError> {
        for attempt in 1..=self.max_attempts {
            if self.probe_once(port).await {
                debug!(port, attempt, "Service is accepting traffic");
                return Ok(());
            }
            debug!(port, attempt, max = self.max_attempts, "Probe attempt failed");
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(WakeError::ServiceNotReady { port })
    }

    /// One probe: connect, send a minimal HEAD, succeed on any response line.
    async fn probe_once(&self, port: u16) -> bool {
        let result = tokio::time::timeout(self.attempt_timeout, async {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.ok()?;

            let request = format!(
                "HEAD / HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nConnection: close\r\n\r\n",
                port
            );
            stream.write_all(request.as_bytes()).await.ok()?;

            let mut reader = BufReader::new(stream);
            let mut status_line = String::new();
            let n = reader.read_line(&mut status_line).await.ok()?;
            (n > 0).then_some(())
        })
        .await;

        matches!(result, Ok(Some(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn fast_probe(max_attempts: u32) -> ReadinessProbe {
        ReadinessProbe {
            max_attempts,
            attempt_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(20),
        }
    }

    /// Minimal listener that answers every connection with the given status
    /// line and returns its port.
    async fn serve_status(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let response = format!("{}\r\nContent-Length: 0\r\n\r\n", status_line);
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_ready_on_first_attempt() {
        let port = serve_status("HTTP/1.1 200 OK").await;
        fast_probe(15).await_ready(port).await.unwrap();
    }

    #[tokio::test]
    async fn test_any_status_counts_as_ready() {
        // Connection-level readiness only: a 500 still means "listening"
        let port = serve_status("HTTP/1.1 500 Internal Server Error").await;
        fast_probe(15).await_ready(port).await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausts_attempts_on_refused_connection() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = fast_probe(3).await_ready(port).await.unwrap_err();
        assert_eq!(err, WakeError::ServiceNotReady { port });
    }

    #[tokio::test]
    async fn test_ready_after_late_start() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        // Start serving a moment after probing begins
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                    .await;
            }
        });

        fast_probe(15).await_ready(port).await.unwrap();
    }
}
