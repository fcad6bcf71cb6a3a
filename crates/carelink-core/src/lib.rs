//! CareLink Core - resilient telemetry fetch client for Medtronic CareLink.
//!
//! This crate fetches the latest device telemetry for a CareLink account.
//! It handles session refresh, patient / care partner / BLE request flows,
//! API version fallback, and proxy rotation with bounded retries. Login,
//! record transformation, and uploading are left to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use carelink_core::{BridgeConfig, CareLinkClient};
//!
//! #[tokio::main]
//! async fn main() -> carelink_core::Result<()> {
//!     let config = BridgeConfig::new("/path/to/session.json").with_country("gb");
//!     let mut client = CareLinkClient::from_config(&config)?;
//!
//!     let snapshot = client.fetch().await?;
//!     println!("Last SG: {:?}", snapshot.last_sg_value());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod endpoints;
pub mod error;
pub mod fetch;
pub mod network;
pub mod session;

// Re-export commonly used types
pub use config::{BridgeConfig, FetchConfig, ServerSelection};
pub use endpoints::Endpoints;
pub use error::{CareLinkError, FailureClass, NetworkErrorKind, Result};
pub use fetch::{
    CareLinkClient, CareLinkClientBuilder, Role, SnapshotSource, TelemetrySnapshot,
};
pub use network::{
    ApiRequest, ApiResponse, HttpClient, ProxyCandidate, ProxyRotator, RequestBody, RetryConfig,
    RetryStats, Transport,
};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionManager, SessionStore};
