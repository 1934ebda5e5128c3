//! Wakegate - a wake-on-request proxy for suspended services
//!
//! This library provides a small activation proxy that:
//! - Receives requests for sleeping projects (routed here by an upstream
//!   proxy via the `x-sleep-project` header)
//! - Buffers the full request, then resumes the project via an external
//!   command, deduplicating concurrent wakes per project
//! - Probes the resolved port until the service actually accepts traffic
//! - Replays the buffered request and streams the response back, so the
//!   client never needs to retry

pub mod buffer;
pub mod config;
pub mod error;
pub mod executor;
pub mod probe;
pub mod proxy;
pub mod wake;
