//! Transport seam between the fetch logic and the wire.
//!
//! The strategy and session code never touch reqwest directly. They build an
//! [`ApiRequest`] and hand it to a [`Dispatcher`], which counts the call
//! against the per-attempt ceiling and forwards it to the bound [`Transport`].

use crate::error::{CareLinkError, Result};
use crate::network::proxy::ProxyCandidate;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One outbound call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            bearer: None,
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            bearer: None,
            body: RequestBody::Json(body),
        }
    }

    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            bearer: None,
            body: RequestBody::Form(fields),
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

/// A non-error response (status in `[200, 400)`) with its parsed body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON, `Null` for an empty body, or a string for non-JSON text.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Number of top-level fields when the body is a JSON object.
    pub fn field_count(&self) -> usize {
        self.body.as_object().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether the body carries nothing usable.
    pub fn is_empty_body(&self) -> bool {
        match &self.body {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

/// Sends requests through the currently bound proxy (if any).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Statuses outside `[200, 400)` are returned as
    /// [`CareLinkError::HttpStatus`]; redirects are never followed.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;

    /// Route all further requests through `proxy`, or directly for `None`.
    fn bind_proxy(&mut self, proxy: Option<&ProxyCandidate>) -> Result<()>;
}

/// Outbound call counter for one fetch attempt.
#[derive(Debug)]
pub struct RequestContext {
    count: AtomicU32,
    ceiling: u32,
}

impl RequestContext {
    pub fn new(ceiling: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            ceiling,
        }
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Account for one more outbound call; fails without dispatching once
    /// the ceiling would be exceeded.
    pub fn admit(&self) -> Result<u32> {
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.ceiling {
            return Err(CareLinkError::RequestCeilingExceeded {
                ceiling: self.ceiling,
            });
        }
        Ok(count)
    }
}

/// The only way fetch code reaches the network.
#[derive(Clone, Copy)]
pub struct Dispatcher<'a> {
    transport: &'a dyn Transport,
    context: &'a RequestContext,
    bearer: Option<&'a str>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(transport: &'a dyn Transport, context: &'a RequestContext) -> Self {
        Self {
            transport,
            context,
            bearer: None,
        }
    }

    /// Copy of this dispatcher that attaches `token` to every request.
    pub fn authorized(self, token: &'a str) -> Self {
        Self {
            bearer: Some(token),
            ..self
        }
    }

    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        let count = self.context.admit()?;
        if request.bearer.is_none() {
            request.bearer = self.bearer.map(str::to_string);
        }
        debug!("#{} {} {}", count, request.method, request.url);
        self.transport.send(&request).await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<ApiResponse> {
        self.send(ApiRequest::get(url)).await
    }

    pub async fn post_json(&self, url: impl Into<String>, body: Value) -> Result<ApiResponse> {
        self.send(ApiRequest::post_json(url, body)).await
    }
}
