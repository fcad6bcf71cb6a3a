//! CareLink session (OAuth token set) handling.
//!
//! - [`Session`] - the persisted token set and its expiry check
//! - `store` - persistence collaborators (file, memory)
//! - `manager` - load, refresh, and invalidate on irrecoverable refresh failure

mod manager;
mod store;

pub use manager::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use crate::config::FetchConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token set produced by the login flow and updated by refreshes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    /// Token endpoint used for refreshes.
    pub token_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Session {
    /// `exp` claim of the access token, if it decodes.
    pub fn access_token_expiry(&self) -> Option<DateTime<Utc>> {
        decode_jwt_expiry(&self.access_token)
    }

    /// Whether the access token is unusable at `now`, allowing `skew` for
    /// clock drift. Tokens without a readable `exp` count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        let skew = chrono::Duration::seconds(skew.as_secs() as i64);
        match self.access_token_expiry() {
            Some(expiry) => expiry - skew <= now,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now(), FetchConfig::TOKEN_EXPIRY_SKEW)
    }
}

/// Read the `exp` claim from a JWT without verifying its signature.
pub fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let seconds = exp.as_i64().or_else(|| exp.as_f64().map(|v| v as i64))?;
    DateTime::from_timestamp(seconds, 0)
}
