//! Network layer for CareLink requests.
//!
//! This module provides:
//! - Proxy candidates and load-order rotation
//! - The transport seam, request ceiling and dispatcher
//! - A reqwest transport with redirects disabled and browser-like headers
//! - Retry policy and per-cycle statistics

mod client;
mod proxy;
mod retry;
mod transport;

pub use client::{classify_request_error, HttpClient};
pub use proxy::{ProxyCandidate, ProxyCredentials, ProxyProtocol, ProxyRotator};
pub use retry::{RetryConfig, RetryDecision, RetryStats};
pub use transport::{ApiRequest, ApiResponse, Dispatcher, RequestBody, RequestContext, Transport};
