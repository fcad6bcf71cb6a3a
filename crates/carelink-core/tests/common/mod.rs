//! Shared fixtures for integration tests: a scripted transport and session helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use carelink_core::network::{ApiRequest, ApiResponse, ProxyCandidate, RequestBody, Transport};
use carelink_core::{
    CareLinkError, Endpoints, MemorySessionStore, NetworkErrorKind, ProxyRotator, Result,
    ServerSelection, Session, SessionStore,
};
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

pub const TOKEN_URL: &str = "https://auth.carelink.test/oauth/token";
pub const PERIODIC_TEMPLATE: &str = "https://clcloud.carelink.test/connect/carepartner/v6/display/message";

/// Canned outcome for one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, Value),
    Network(NetworkErrorKind),
}

pub fn ok(body: Value) -> Reply {
    Reply::Status(200, body)
}

/// A request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    pub body: RequestBody,
    pub proxy: Option<String>,
    pub at: Instant,
}

struct Route {
    method: Method,
    prefix: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct State {
    routes: Vec<Route>,
    requests: Vec<Recorded>,
    bound: Vec<Option<String>>,
}

/// In-memory transport answering by method and longest matching URL prefix.
///
/// Each route plays its replies in order and repeats the last one forever.
/// Unrouted requests get a 404. Clones share state, so a test keeps one
/// handle and gives the other to the client.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<State>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, method: Method, prefix: &str, replies: Vec<Reply>) -> &Self {
        self.state.lock().unwrap().routes.push(Route {
            method,
            prefix: prefix.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn get(&self, prefix: &str, reply: Reply) -> &Self {
        self.route(Method::GET, prefix, vec![reply])
    }

    pub fn post(&self, prefix: &str, reply: Reply) -> &Self {
        self.route(Method::POST, prefix, vec![reply])
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    /// Requests whose URL starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.starts_with(prefix))
            .collect()
    }

    /// Every proxy address bound so far, in order.
    pub fn bound_proxies(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().bound.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        let proxy = state.bound.last().cloned().flatten();
        state.requests.push(Recorded {
            method: request.method.clone(),
            url: request.url.clone(),
            bearer: request.bearer.clone(),
            body: request.body.clone(),
            proxy,
            at: Instant::now(),
        });

        let route = state
            .routes
            .iter_mut()
            .filter(|route| route.method == request.method && request.url.starts_with(&route.prefix))
            .max_by_key(|route| route.prefix.len());
        let reply = match route {
            Some(route) if route.replies.len() > 1 => route.replies.pop_front(),
            Some(route) => route.replies.front().cloned(),
            None => None,
        };

        match reply {
            Some(Reply::Status(status, body)) if (200..400).contains(&status) => {
                Ok(ApiResponse::new(status, body))
            }
            Some(Reply::Status(status, _)) => Err(CareLinkError::HttpStatus {
                status,
                url: request.url.clone(),
            }),
            Some(Reply::Network(kind)) => Err(CareLinkError::Network {
                kind,
                url: request.url.clone(),
                message: kind.to_string(),
            }),
            None => Err(CareLinkError::HttpStatus {
                status: 404,
                url: request.url.clone(),
            }),
        }
    }

    fn bind_proxy(&mut self, proxy: Option<&ProxyCandidate>) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .bound
            .push(proxy.map(ProxyCandidate::address));
        Ok(())
    }
}

pub fn endpoints() -> Endpoints {
    Endpoints::resolve(&ServerSelection::Default, "gb", "en").unwrap()
}

pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({"exp": exp}).to_string());
    format!("{}.{}.sig", header, payload)
}

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn session_with_token(access_token: String) -> Session {
    Session {
        access_token,
        refresh_token: "refresh-token".into(),
        client_id: "carelink-client".into(),
        token_url: TOKEN_URL.into(),
        audience: None,
        scope: None,
    }
}

pub fn valid_session() -> Session {
    session_with_token(jwt_with_exp(now_secs() + 3600))
}

pub fn expired_session() -> Session {
    session_with_token(jwt_with_exp(now_secs() - 3600))
}

pub fn store_with(session: Option<Session>) -> Arc<MemorySessionStore> {
    Arc::new(MemorySessionStore::new(session))
}

/// Session store that loads but refuses every write, like a full disk.
pub struct ReadOnlyStore {
    pub inner: MemorySessionStore,
}

impl ReadOnlyStore {
    pub fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySessionStore::new(Some(session)),
        })
    }
}

impl SessionStore for ReadOnlyStore {
    fn load(&self) -> Result<Option<Session>> {
        self.inner.load()
    }

    fn save(&self, _session: &Session) -> Result<()> {
        Err(CareLinkError::Other("read-only store".into()))
    }

    fn delete(&self) -> Result<()> {
        Err(CareLinkError::Other("read-only store".into()))
    }
}

pub fn proxies(count: usize) -> ProxyRotator {
    ProxyRotator::new(
        (1..=count)
            .map(|i| ProxyCandidate::new(format!("10.0.0.{}", i), 8080))
            .collect(),
    )
}

pub fn proxy_address(index: usize) -> Option<String> {
    Some(format!("10.0.0.{}:8080", index))
}

pub fn patient_profile() -> Reply {
    ok(json!({"username": "alice", "role": "PATIENT", "patientId": "alice-id"}))
}

pub fn care_partner_profile() -> Reply {
    ok(json!({"username": "bob", "role": "CARE_PARTNER_OUS"}))
}

pub fn country_settings(endpoint: Option<&str>) -> Reply {
    match endpoint {
        Some(endpoint) => ok(json!({"blePereodicDataEndpoint": endpoint, "region": "EU"})),
        None => ok(json!({"region": "EU"})),
    }
}
