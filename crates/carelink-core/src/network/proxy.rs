//! Forward proxy candidates and rotation.
//!
//! Candidates are tried in load order, never shuffled, so two runs with the
//! same proxy list behave the same way. The rotator remembers the currently
//! selected candidate across fetch cycles and counts how many candidates have
//! been bound during the current cycle.

use crate::error::{CareLinkError, Result};
use std::path::Path;
use tracing::{debug, info};
use url::{Host, Url};

/// Protocols a proxy candidate can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    fn from_scheme(scheme: &str) -> Option<Vec<Self>> {
        match scheme.to_lowercase().as_str() {
            "http" => Some(vec![ProxyProtocol::Http, ProxyProtocol::Https]),
            "https" => Some(vec![ProxyProtocol::Https]),
            "socks5" | "socks5h" => Some(vec![ProxyProtocol::Socks5]),
            _ => None,
        }
    }
}

/// Proxy basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A single forward proxy. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCandidate {
    pub host: String,
    pub port: u16,
    pub credentials: Option<ProxyCredentials>,
    pub protocols: Vec<ProxyProtocol>,
}

impl ProxyCandidate {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
            protocols: vec![ProxyProtocol::Http, ProxyProtocol::Https],
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(ProxyCredentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_protocols(mut self, protocols: Vec<ProxyProtocol>) -> Self {
        self.protocols = protocols;
        self
    }

    pub fn is_socks(&self) -> bool {
        self.protocols.contains(&ProxyProtocol::Socks5)
    }

    /// `host:port`, safe to log. IPv6 hosts are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Proxy URL without credentials.
    pub fn url(&self) -> String {
        let scheme = if self.is_socks() { "socks5" } else { "http" };
        format!("{}://{}", scheme, self.address())
    }

    /// Build the reqwest proxy for this candidate.
    pub fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        let proxy_error = |e: reqwest::Error| CareLinkError::Proxy {
            message: format!("Invalid proxy {}: {}", self.address(), e),
        };

        // SOCKS credentials travel in the URL, HTTP ones as Proxy-Authorization.
        match (&self.credentials, self.is_socks()) {
            (Some(_), true) => {
                reqwest::Proxy::all(self.authenticated_url()?.as_str()).map_err(proxy_error)
            }
            (Some(creds), false) => Ok(reqwest::Proxy::all(self.url())
                .map_err(proxy_error)?
                .basic_auth(&creds.username, &creds.password)),
            (None, _) => reqwest::Proxy::all(self.url()).map_err(proxy_error),
        }
    }

    /// Proxy URL with the credentials percent-encoded into the userinfo.
    pub fn authenticated_url(&self) -> Result<Url> {
        let proxy_error = |reason: &str| CareLinkError::Proxy {
            message: format!("Invalid proxy {}: {}", self.address(), reason),
        };

        let mut url = Url::parse(&self.url()).map_err(|e| proxy_error(&e.to_string()))?;
        if let Some(creds) = &self.credentials {
            url.set_username(&creds.username)
                .map_err(|_| proxy_error("cannot carry a username"))?;
            url.set_password(Some(&creds.password))
                .map_err(|_| proxy_error("cannot carry a password"))?;
        }
        Ok(url)
    }

    /// Parse one proxy list line.
    ///
    /// Accepts `scheme://[user:pass@]host:port` and `host:port[:user:pass]`.
    /// Credentials in the URL form may be percent-encoded.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let invalid = |reason: &str| CareLinkError::Proxy {
            message: format!("Invalid proxy entry '{}': {}", redact_entry(line), reason),
        };

        if line.contains("://") {
            let url = Url::parse(line).map_err(|e| invalid(&e.to_string()))?;
            let protocols = ProxyProtocol::from_scheme(url.scheme()).ok_or_else(|| invalid("unsupported scheme"))?;
            let host = match url.host() {
                Some(Host::Ipv6(addr)) => addr.to_string(),
                Some(host) => host.to_string(),
                None => return Err(invalid("missing host")),
            };
            let port = url
                .port_or_known_default()
                .filter(|port| *port > 0)
                .ok_or_else(|| invalid("missing port"))?;

            let mut candidate = ProxyCandidate::new(host, port).with_protocols(protocols);
            if !url.username().is_empty() {
                let password = url.password().ok_or_else(|| invalid("credentials must be user:pass"))?;
                let decode = |value: &str| {
                    urlencoding::decode(value)
                        .map(|decoded| decoded.into_owned())
                        .map_err(|_| invalid("credentials are not valid UTF-8"))
                };
                candidate = candidate.with_credentials(decode(url.username())?, decode(password)?);
            }
            return Ok(candidate);
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [host, port] => {
                let port = parse_port(port).ok_or_else(|| invalid("bad port"))?;
                Ok(ProxyCandidate::new(*host, port))
            }
            [host, port, user, pass] => {
                let port = parse_port(port).ok_or_else(|| invalid("bad port"))?;
                Ok(ProxyCandidate::new(*host, port).with_credentials(*user, *pass))
            }
            _ => Err(invalid("expected host:port or host:port:user:pass")),
        }
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok().filter(|port| *port > 0)
}

/// Strip anything after the host part so passwords never reach error text.
fn redact_entry(line: &str) -> String {
    match line.rsplit_once('@') {
        Some((_, host)) => format!("<credentials>@{}", host),
        None => line.split(':').take(2).collect::<Vec<_>>().join(":"),
    }
}

/// Ordered proxy candidates with per-cycle exhaustion tracking.
#[derive(Debug, Clone, Default)]
pub struct ProxyRotator {
    candidates: Vec<ProxyCandidate>,
    /// Index of the currently selected candidate.
    current: usize,
    /// Candidates bound during the current fetch cycle.
    tried: usize,
}

impl ProxyRotator {
    pub fn new(candidates: Vec<ProxyCandidate>) -> Self {
        Self {
            candidates,
            current: 0,
            tried: 0,
        }
    }

    /// Rotator with no candidates; every request goes direct.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Parse a proxy list: one candidate per line, `#` comments allowed.
    pub fn parse(text: &str) -> Result<Self> {
        let mut candidates = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let candidate = ProxyCandidate::parse(line).map_err(|e| CareLinkError::Proxy {
                message: format!("line {}: {}", index + 1, e),
            })?;
            candidates.push(candidate);
        }
        Ok(Self::new(candidates))
    }

    /// Load a proxy list file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CareLinkError::io_with_path(e, path))?;
        let rotator = Self::parse(&text)?;
        info!("Loaded {} proxy candidates from {}", rotator.len(), path.display());
        Ok(rotator)
    }

    pub fn has_proxies(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidate to bind at the start of a cycle. Counts as tried.
    ///
    /// This is the currently selected candidate, not always the first in the
    /// list: the first on the first cycle, then whichever candidate the last
    /// cycle ended on. Selection persists across cycles so a working proxy is
    /// kept.
    pub fn get_next(&mut self) -> Option<&ProxyCandidate> {
        if self.candidates.is_empty() {
            return None;
        }
        self.tried = self.tried.max(1);
        self.candidates.get(self.current)
    }

    /// Advance to the next candidate, or `None` once every candidate has
    /// been tried in this cycle.
    pub fn try_next(&mut self) -> Option<&ProxyCandidate> {
        if self.tried >= self.candidates.len() {
            debug!("All {} proxy candidates tried this cycle", self.candidates.len());
            return None;
        }
        self.current = (self.current + 1) % self.candidates.len();
        self.tried += 1;
        self.candidates.get(self.current)
    }

    /// Re-arm exhaustion tracking for a new fetch cycle.
    pub fn reset_retries(&mut self) {
        self.tried = 0;
    }

    /// Number of candidates bound in the current cycle.
    pub fn tried(&self) -> usize {
        self.tried
    }
}
