//! Fetch cycle driver: session check, strategy, proxy swaps and backoff.

use crate::config::{BridgeConfig, FetchConfig};
use crate::endpoints::Endpoints;
use crate::error::{CareLinkError, Result};
use crate::fetch::snapshot::TelemetrySnapshot;
use crate::fetch::strategy::FetchStrategy;
use crate::network::{
    Dispatcher, HttpClient, ProxyRotator, RequestContext, RetryConfig, RetryDecision, RetryStats,
    Transport,
};
use crate::session::{FileSessionStore, SessionManager, SessionStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builder for [`CareLinkClient`].
///
/// # Example
///
/// ```rust,ignore
/// use carelink_core::{CareLinkClient, Endpoints, FileSessionStore, ServerSelection};
/// use std::sync::Arc;
///
/// let endpoints = Endpoints::resolve(&ServerSelection::Default, "gb", "en")?;
/// let mut client = CareLinkClient::builder(endpoints, Arc::new(FileSessionStore::new("session.json")))
///     .with_patient_id(Some("alice".into()))
///     .build()?;
/// let snapshot = client.fetch().await?;
/// ```
pub struct CareLinkClientBuilder {
    endpoints: Endpoints,
    store: Arc<dyn SessionStore>,
    transport: Option<Box<dyn Transport>>,
    rotator: ProxyRotator,
    retry: Option<RetryConfig>,
    request_ceiling: u32,
    patient_id: Option<String>,
    username: Option<String>,
}

impl CareLinkClientBuilder {
    pub fn new(endpoints: Endpoints, store: Arc<dyn SessionStore>) -> Self {
        Self {
            endpoints,
            store,
            transport: None,
            rotator: ProxyRotator::disabled(),
            retry: None,
            request_ceiling: FetchConfig::REQUEST_CEILING,
            patient_id: None,
            username: None,
        }
    }

    /// Use a custom transport instead of the reqwest client.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Proxy candidates to rotate through.
    pub fn with_proxies(mut self, rotator: ProxyRotator) -> Self {
        self.rotator = rotator;
        self
    }

    /// Override the retry policy.
    ///
    /// Default: [`RetryConfig::for_proxies`] based on the configured proxies.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Maximum outbound calls per attempt.
    ///
    /// Default: [`FetchConfig::REQUEST_CEILING`]
    pub fn with_request_ceiling(mut self, ceiling: u32) -> Self {
        self.request_ceiling = ceiling;
        self
    }

    pub fn with_patient_id(mut self, patient_id: Option<String>) -> Self {
        self.patient_id = patient_id;
        self
    }

    pub fn with_username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn build(self) -> Result<CareLinkClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpClient::new()?),
        };
        let retry = self
            .retry
            .unwrap_or_else(|| RetryConfig::for_proxies(self.rotator.has_proxies()));

        Ok(CareLinkClient {
            transport,
            rotator: self.rotator,
            sessions: SessionManager::new(self.store),
            endpoints: self.endpoints,
            patient_id: self.patient_id,
            username: self.username,
            retry,
            context: RequestContext::new(self.request_ceiling),
            last_stats: RetryStats::default(),
        })
    }
}

/// Resilient CareLink fetch client.
///
/// One [`fetch`](Self::fetch) runs at a time; `&mut self` enforces it.
pub struct CareLinkClient {
    transport: Box<dyn Transport>,
    rotator: ProxyRotator,
    sessions: SessionManager,
    endpoints: Endpoints,
    patient_id: Option<String>,
    username: Option<String>,
    retry: RetryConfig,
    context: RequestContext,
    last_stats: RetryStats,
}

impl CareLinkClient {
    pub fn builder(endpoints: Endpoints, store: Arc<dyn SessionStore>) -> CareLinkClientBuilder {
        CareLinkClientBuilder::new(endpoints, store)
    }

    /// Build a client with the reqwest transport and a file session store.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let endpoints =
            Endpoints::resolve(&config.server, &config.country_code, &config.language_code)?;

        let rotator = match (config.use_proxy, &config.proxy_file) {
            (false, _) => ProxyRotator::disabled(),
            (true, Some(path)) => ProxyRotator::from_file(path)?,
            (true, None) => {
                return Err(CareLinkError::Config {
                    message: "proxy rotation is enabled but no proxy list file is set".to_string(),
                })
            }
        };
        if config.use_proxy && !rotator.has_proxies() {
            warn!("Proxy rotation enabled but the proxy list is empty, connecting directly");
        }

        Self::builder(endpoints, Arc::new(FileSessionStore::new(&config.session_file)))
            .with_proxies(rotator)
            .with_patient_id(config.patient_id.clone())
            .with_username(config.username.clone())
            .build()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Statistics of the most recent [`fetch`](Self::fetch).
    pub fn last_stats(&self) -> &RetryStats {
        &self.last_stats
    }

    /// Run one fetch cycle.
    ///
    /// # Errors
    ///
    /// Credential failures and the request ceiling propagate immediately.
    /// Proxy-transient failures propagate once every proxy was tried this
    /// cycle; anything else once the attempt bound is used up.
    pub async fn fetch(&mut self) -> Result<TelemetrySnapshot> {
        let mut stats = RetryStats::default();
        let result = self.run_cycle(&mut stats).await;

        stats.success = result.is_ok();
        if let Err(e) = &result {
            stats.last_error = Some(e.to_string());
        }
        self.last_stats = stats;
        result
    }

    async fn run_cycle(&mut self, stats: &mut RetryStats) -> Result<TelemetrySnapshot> {
        self.context.reset();
        self.rotator.reset_retries();
        if let Some(proxy) = self.rotator.get_next() {
            info!("Using proxy {}", proxy.address());
            self.transport.bind_proxy(Some(proxy))?;
        }

        let mut attempt = 1;
        loop {
            stats.attempts += 1;
            self.context.reset();

            let error = match self.attempt().await {
                Ok(snapshot) => {
                    debug!(
                        "Fetch succeeded on attempt {} ({} requests)",
                        attempt,
                        self.context.count()
                    );
                    return Ok(snapshot);
                }
                Err(e) => e,
            };

            match self.retry.decide(&error, attempt) {
                RetryDecision::Propagate => return Err(error),
                RetryDecision::SwapProxy => {
                    let Some(proxy) = self.rotator.try_next() else {
                        warn!("Request failed ({}) and no proxy candidates remain", error);
                        return Err(error);
                    };
                    warn!("Request failed ({}), switching to proxy {}", error, proxy.address());
                    self.transport.bind_proxy(Some(proxy))?;
                    stats.proxy_swaps += 1;

                    let delay = self.retry.proxy_swap_delay;
                    tokio::time::sleep(delay).await;
                    stats.total_delay += delay;
                }
                RetryDecision::Backoff { delay } => {
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, self.retry.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    stats.total_delay += delay;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self) -> Result<TelemetrySnapshot> {
        let dispatcher = Dispatcher::new(self.transport.as_ref(), &self.context);
        let session = self.sessions.ensure_valid(dispatcher).await?;

        FetchStrategy::new(&self.endpoints)
            .with_patient_id(self.patient_id.as_deref())
            .with_username(self.username.as_deref())
            .execute(dispatcher.authorized(&session.access_token))
            .await
    }
}
