//! Error types for the CareLink fetch client.
//!
//! Every failure a fetch cycle can end with is a variant of [`CareLinkError`].
//! Retry decisions are made in one place, the orchestrator, using
//! [`CareLinkError::failure_class`].

use std::path::PathBuf;
use thiserror::Error;

/// Low-level network failure categories recognized by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionRefused,
    Timeout,
    ConnectionReset,
    DnsNotFound,
    TlsProtocol,
    BadSocketPort,
    /// The proxy refused to open a CONNECT tunnel (403/407 to CONNECT).
    ProxyRejected,
    Other,
}

impl NetworkErrorKind {
    /// Whether this kind usually means the bound proxy is dead or blocked.
    pub fn is_proxy_transient(&self) -> bool {
        !matches!(self, NetworkErrorKind::Other)
    }
}

impl std::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkErrorKind::ConnectionRefused => write!(f, "connection refused"),
            NetworkErrorKind::Timeout => write!(f, "timed out"),
            NetworkErrorKind::ConnectionReset => write!(f, "connection reset"),
            NetworkErrorKind::DnsNotFound => write!(f, "dns lookup failed"),
            NetworkErrorKind::TlsProtocol => write!(f, "tls protocol error"),
            NetworkErrorKind::BadSocketPort => write!(f, "bad socket port"),
            NetworkErrorKind::ProxyRejected => write!(f, "proxy rejected tunnel"),
            NetworkErrorKind::Other => write!(f, "network error"),
        }
    }
}

/// How the orchestrator should react to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Escapes the retry loop immediately.
    Fatal,
    /// Proxy or network trouble: swap to the next proxy.
    Transient,
    /// Anything else: exponential backoff on non-final attempts.
    Unclassified,
}

/// HTTP statuses that indicate a blocked, banned or overloaded proxy path.
pub const PROXY_TRANSIENT_STATUSES: [u16; 5] = [400, 403, 407, 502, 503];

/// Main error type for the CareLink client.
#[derive(Debug, Error)]
pub enum CareLinkError {
    // Credential errors
    #[error("No stored credentials, run the login flow first")]
    NoCredentials,

    #[error("Session refresh failed, re-login required: {reason}")]
    RefreshExpired { reason: String },

    // Strategy errors
    #[error("Care partner account has no linked patients")]
    NoLinkedPatient,

    #[error("Country settings did not provide a periodic data endpoint")]
    MissingDataEndpoint,

    #[error("Country settings did not provide a BLE data endpoint")]
    NoBleEndpoint,

    #[error("BLE endpoint returned an empty response")]
    EmptyBleResponse,

    #[error("All {} periodic data endpoints failed", tried.len())]
    AllEndpointsFailed { tried: Vec<String> },

    #[error("Request ceiling of {ceiling} outbound calls exceeded in one attempt")]
    RequestCeilingExceeded { ceiling: u32 },

    // Transport errors
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Network error ({kind}) for {url}: {message}")]
    Network {
        kind: NetworkErrorKind,
        url: String,
        message: String,
    },

    #[error("Proxy configuration error: {message}")]
    Proxy { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for CareLink operations.
pub type Result<T> = std::result::Result<T, CareLinkError>;

impl From<std::io::Error> for CareLinkError {
    fn from(err: std::io::Error) -> Self {
        CareLinkError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CareLinkError {
    fn from(err: serde_json::Error) -> Self {
        CareLinkError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CareLinkError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CareLinkError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error for the retry loop.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            CareLinkError::NoCredentials
            | CareLinkError::RefreshExpired { .. }
            | CareLinkError::RequestCeilingExceeded { .. }
            | CareLinkError::Config { .. }
            | CareLinkError::Proxy { .. } => FailureClass::Fatal,

            CareLinkError::HttpStatus { status, .. } if PROXY_TRANSIENT_STATUSES.contains(status) => {
                FailureClass::Transient
            }
            CareLinkError::Network { kind, .. } if kind.is_proxy_transient() => {
                FailureClass::Transient
            }

            _ => FailureClass::Unclassified,
        }
    }

    /// Whether this failure needs a human to run the login flow again.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            CareLinkError::NoCredentials | CareLinkError::RefreshExpired { .. }
        )
    }
}
