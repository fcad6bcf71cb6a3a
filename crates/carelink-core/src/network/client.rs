//! reqwest-backed transport.
//!
//! Provides a wrapper around reqwest with:
//! - Redirects disabled so 3xx responses are inspected, not chased
//! - A fixed browser-like header set
//! - Per-call timeout
//! - Proxy rebinding (the underlying client is rebuilt per bind)
//! - Network failure classification for the retry policy

use crate::config::FetchConfig;
use crate::error::{CareLinkError, NetworkErrorKind, Result};
use crate::network::proxy::ProxyCandidate;
use crate::network::transport::{ApiRequest, ApiResponse, RequestBody, Transport};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{redirect, Client, StatusCode};
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP transport used in production.
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    /// Address of the bound proxy, for logging.
    bound_proxy: Option<String>,
}

impl HttpClient {
    /// Create a direct (proxy-less) client with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(FetchConfig::REQUEST_TIMEOUT)
    }

    /// Create a direct client with a custom per-call timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout, None)?,
            timeout,
            bound_proxy: None,
        })
    }

    /// Address of the proxy requests currently go through.
    pub fn bound_proxy(&self) -> Option<&str> {
        self.bound_proxy.as_deref()
    }

    /// Statuses the transport treats as non-errors.
    pub fn is_success_status(status: StatusCode) -> bool {
        (200..400).contains(&status.as_u16())
    }

    fn network_error(&self, url: &str, err: &reqwest::Error) -> CareLinkError {
        let mut kind = classify_request_error(err);
        // A connect failure while proxied is the proxy's, so it must rotate.
        if kind == NetworkErrorKind::Other && err.is_connect() && self.bound_proxy.is_some() {
            kind = NetworkErrorKind::ConnectionRefused;
        }
        CareLinkError::Network {
            kind,
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| self.network_error(&request.url, &e))?;

        let status = response.status();
        if !Self::is_success_status(status) {
            debug!("{} {} -> {}", request.method, request.url, status);
            return Err(CareLinkError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.network_error(&request.url, &e))?;

        Ok(ApiResponse::new(status.as_u16(), parse_body(&text)))
    }

    fn bind_proxy(&mut self, proxy: Option<&ProxyCandidate>) -> Result<()> {
        self.client = build_client(self.timeout, proxy)?;
        self.bound_proxy = proxy.map(ProxyCandidate::address);
        match &self.bound_proxy {
            Some(address) => info!("Routing requests through proxy {}", address),
            None => debug!("Routing requests directly"),
        }
        Ok(())
    }
}

fn build_client(timeout: Duration, proxy: Option<&ProxyCandidate>) -> Result<Client> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .redirect(redirect::Policy::none())
        .user_agent(FetchConfig::USER_AGENT)
        .default_headers(browser_headers())
        .tcp_keepalive(Some(Duration::from_secs(60)));

    builder = match proxy {
        Some(candidate) => builder.proxy(candidate.to_reqwest()?),
        None => builder.no_proxy(),
    };

    builder.build().map_err(|e| CareLinkError::Config {
        message: format!("Failed to create HTTP client: {}", e),
    })
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(FetchConfig::ACCEPT));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static(FetchConfig::ACCEPT_LANGUAGE),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

/// JSON when possible, `Null` for an empty body, raw text otherwise.
fn parse_body(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Map a reqwest failure onto the retry policy's network categories.
///
/// Only the causes are inspected. The top-level message embeds the request
/// URL, which must not influence the category.
pub fn classify_request_error(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(kind) = classify_io_kind(io.kind()) {
                return kind;
            }
        }
        if let Some(kind) = classify_error_message(&cause.to_string()) {
            return kind;
        }
        source = cause.source();
    }

    NetworkErrorKind::Other
}

fn classify_io_kind(kind: std::io::ErrorKind) -> Option<NetworkErrorKind> {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::ConnectionRefused => Some(NetworkErrorKind::ConnectionRefused),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            Some(NetworkErrorKind::ConnectionReset)
        }
        ErrorKind::TimedOut => Some(NetworkErrorKind::Timeout),
        _ => None,
    }
}

fn classify_error_message(message: &str) -> Option<NetworkErrorKind> {
    let message = message.to_lowercase();
    if message.contains("tunnel")
        || message.contains("proxy authentication required")
        || message.contains("proxy authorization required")
    {
        Some(NetworkErrorKind::ProxyRejected)
    } else if message.contains("connection refused") {
        Some(NetworkErrorKind::ConnectionRefused)
    } else if message.contains("connection reset") {
        Some(NetworkErrorKind::ConnectionReset)
    } else if message.contains("timed out") {
        Some(NetworkErrorKind::Timeout)
    } else if message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
    {
        Some(NetworkErrorKind::DnsNotFound)
    } else if message.contains("invalid port") || message.contains("bad port") {
        Some(NetworkErrorKind::BadSocketPort)
    } else if message.contains("tls") || message.contains("ssl") || message.contains("handshake") {
        Some(NetworkErrorKind::TlsProtocol)
    } else {
        None
    }
}
