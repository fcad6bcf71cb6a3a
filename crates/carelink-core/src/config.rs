//! Centralized configuration for the CareLink client.
//!
//! Fixed policy values live as associated constants on [`FetchConfig`].
//! Per-deployment values are collected once into a [`BridgeConfig`] by the
//! host process and handed to the client; nothing in this crate reads the
//! environment.

use std::path::PathBuf;
use std::time::Duration;

/// Fetch policy and transport constants.
pub struct FetchConfig;

impl FetchConfig {
    // Transport
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    pub const ACCEPT: &'static str = "application/json, text/plain, */*";
    pub const ACCEPT_LANGUAGE: &'static str = "en;q=0.9, *;q=0.8";

    // Retry policy
    pub const REQUEST_CEILING: u32 = 30;
    pub const PROXY_MAX_ATTEMPTS: u32 = 10;
    pub const DIRECT_MAX_ATTEMPTS: u32 = 1;
    pub const PROXY_SWAP_DELAY: Duration = Duration::from_secs(1);
    pub const BACKOFF_BASE: u32 = 2;

    // Session
    pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

    // Host defaults
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
    pub const DEFAULT_COUNTRY: &'static str = "gb";
    pub const DEFAULT_LANGUAGE: &'static str = "en";
    pub const SESSION_FILENAME: &'static str = "session.json";
}

/// Which CareLink server to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServerSelection {
    /// Explicit host name (or base URL) that overrides everything else.
    Explicit(String),
    /// Named region, e.g. `US` or `EU`.
    Named(String),
    /// Default region (EU).
    #[default]
    Default,
}

/// Resolved process configuration consumed by the client.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub server: ServerSelection,
    pub country_code: String,
    pub language_code: String,
    /// Fixed patient for care partner accounts linked to several patients.
    pub patient_id: Option<String>,
    /// Username used in BLE request bodies when the profile lacks one.
    pub username: Option<String>,
    pub use_proxy: bool,
    pub proxy_file: Option<PathBuf>,
    pub session_file: PathBuf,
    pub poll_interval: Duration,
}

impl BridgeConfig {
    /// Create a config with defaults for everything but the session file.
    pub fn new(session_file: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerSelection::Default,
            country_code: FetchConfig::DEFAULT_COUNTRY.to_string(),
            language_code: FetchConfig::DEFAULT_LANGUAGE.to_string(),
            patient_id: None,
            username: None,
            use_proxy: false,
            proxy_file: None,
            session_file: session_file.into(),
            poll_interval: FetchConfig::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_server(mut self, server: ServerSelection) -> Self {
        self.server = server;
        self
    }

    pub fn with_country(mut self, country_code: impl Into<String>) -> Self {
        self.country_code = country_code.into();
        self
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language_code = language_code.into();
        self
    }

    pub fn with_patient_id(mut self, patient_id: Option<String>) -> Self {
        self.patient_id = patient_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username.filter(|name| !name.trim().is_empty());
        self
    }

    /// Enable proxy rotation using the candidates in `proxy_file`.
    pub fn with_proxies(mut self, use_proxy: bool, proxy_file: Option<PathBuf>) -> Self {
        self.use_proxy = use_proxy;
        self.proxy_file = proxy_file;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
