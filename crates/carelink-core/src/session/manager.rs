//! Keeps a usable bearer token available for each fetch attempt.

use crate::config::FetchConfig;
use crate::error::{CareLinkError, Result};
use crate::network::{ApiRequest, Dispatcher};
use crate::session::{Session, SessionStore};
use chrono::Utc;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Token endpoint response for a refresh grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Loads the persisted session and refreshes it when the access token expires.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    skew: Duration,
    /// Refreshed session the store failed to persist. Takes precedence over
    /// the store, whose copy holds a refresh token that may be rotated out.
    unsaved: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            skew: FetchConfig::TOKEN_EXPIRY_SKEW,
            unsaved: Mutex::new(None),
        }
    }

    /// Override the clock-skew tolerance.
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// Return a session whose access token is valid right now.
    ///
    /// `dispatcher` must be unauthorized: the refresh call carries no bearer.
    ///
    /// # Errors
    ///
    /// - [`CareLinkError::NoCredentials`] when nothing is persisted.
    /// - [`CareLinkError::RefreshExpired`] when the token endpoint rejects the
    ///   refresh; the persisted session is deleted first.
    /// - Network errors during refresh pass through unchanged so the caller
    ///   can rotate proxies.
    ///
    /// A refreshed session that cannot be saved is still returned, and kept
    /// in memory until a later call manages to persist it.
    pub async fn ensure_valid(&self, dispatcher: Dispatcher<'_>) -> Result<Session> {
        let session = self.current()?;
        if !session.is_expired_at(Utc::now(), self.skew) {
            return Ok(session);
        }

        info!("Access token expired, refreshing session");
        match self.refresh(&session, dispatcher).await {
            Ok(refreshed) => {
                self.persist(&refreshed)?;
                info!("Session refreshed");
                Ok(refreshed)
            }
            Err(e @ CareLinkError::Network { .. }) => Err(e),
            Err(e @ CareLinkError::RequestCeilingExceeded { .. }) => Err(e),
            Err(e) => {
                error!("Session refresh rejected: {}", e);
                if let Err(delete_err) = self.store.delete() {
                    warn!("Failed to delete persisted session: {}", delete_err);
                }
                Err(CareLinkError::RefreshExpired {
                    reason: e.to_string(),
                })
            }
        }
    }

    fn current(&self) -> Result<Session> {
        let pending = self.lock_unsaved()?.clone();
        match pending {
            Some(session) => {
                self.persist(&session)?;
                Ok(session)
            }
            None => self.store.load()?.ok_or(CareLinkError::NoCredentials),
        }
    }

    /// Save `session`, holding it in memory when the store fails.
    fn persist(&self, session: &Session) -> Result<()> {
        let mut unsaved = self.lock_unsaved()?;
        match self.store.save(session) {
            Ok(()) => *unsaved = None,
            Err(e) => {
                error!("Failed to persist refreshed session, keeping it in memory: {}", e);
                *unsaved = Some(session.clone());
            }
        }
        Ok(())
    }

    fn lock_unsaved(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>> {
        self.unsaved
            .lock()
            .map_err(|_| CareLinkError::Other("session manager lock poisoned".to_string()))
    }

    async fn refresh(&self, session: &Session, dispatcher: Dispatcher<'_>) -> Result<Session> {
        let mut fields = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("client_id".to_string(), session.client_id.clone()),
            ("refresh_token".to_string(), session.refresh_token.clone()),
        ];
        if let Some(audience) = &session.audience {
            fields.push(("audience".to_string(), audience.clone()));
        }
        if let Some(scope) = &session.scope {
            fields.push(("scope".to_string(), scope.clone()));
        }

        let response = dispatcher
            .send(ApiRequest::post_form(&session.token_url, fields))
            .await?;
        let token: TokenResponse = serde_json::from_value(response.body)?;

        let refreshed = Session {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| session.refresh_token.clone()),
            ..session.clone()
        };

        if refreshed.is_expired_at(Utc::now(), self.skew) {
            return Err(CareLinkError::Other(
                "token endpoint returned an already expired access token".to_string(),
            ));
        }
        Ok(refreshed)
    }
}
