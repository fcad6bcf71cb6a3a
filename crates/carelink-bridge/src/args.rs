//! Command line arguments and their conversion into a [`BridgeConfig`].

use anyhow::{bail, Context, Result};
use carelink_core::{BridgeConfig, FetchConfig, ServerSelection};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "carelink-bridge")]
#[command(about = "Polls CareLink for the latest device telemetry")]
pub struct Args {
    /// Explicit CareLink host or base URL (overrides --region)
    #[arg(long, env = "CARELINK_SERVER")]
    pub server: Option<String>,

    /// CareLink region (EU or US)
    #[arg(long, env = "CARELINK_REGION")]
    pub region: Option<String>,

    /// Country code used for country settings
    #[arg(long, env = "CARELINK_COUNTRY", default_value = FetchConfig::DEFAULT_COUNTRY)]
    pub country: String,

    /// Language code used for country settings
    #[arg(long, env = "CARELINK_LANGUAGE", default_value = FetchConfig::DEFAULT_LANGUAGE)]
    pub language: String,

    /// Patient to read when a care partner account has several
    #[arg(long, env = "CARELINK_PATIENT_ID")]
    pub patient_id: Option<String>,

    /// Username sent to periodic data endpoints if the profile lacks one
    #[arg(long, env = "CARELINK_USERNAME")]
    pub username: Option<String>,

    /// Rotate through the proxies listed in --proxy-file
    #[arg(long, env = "CARELINK_USE_PROXY")]
    pub use_proxy: bool,

    /// Proxy list, one `host:port[:user:pass]` or URL per line
    #[arg(long, env = "CARELINK_PROXY_FILE")]
    pub proxy_file: Option<PathBuf>,

    /// Session file written by the login flow
    #[arg(long, env = "CARELINK_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Seconds between fetch cycles
    #[arg(long, env = "CARELINK_INTERVAL", default_value_t = FetchConfig::DEFAULT_POLL_INTERVAL.as_secs())]
    pub interval: u64,

    /// Fetch once, print the snapshot as JSON and exit
    #[arg(long)]
    pub once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Args {
    pub fn into_config(self) -> Result<BridgeConfig> {
        if self.interval == 0 {
            bail!("--interval must be at least one second");
        }

        let server = match (self.server, self.region) {
            (Some(server), _) if !server.trim().is_empty() => ServerSelection::Explicit(server),
            (_, Some(region)) if !region.trim().is_empty() => ServerSelection::Named(region),
            _ => ServerSelection::Default,
        };

        let session_file = match self.session_file {
            Some(path) => path,
            None => default_session_file()?,
        };

        Ok(BridgeConfig::new(session_file)
            .with_server(server)
            .with_country(self.country)
            .with_language(self.language)
            .with_patient_id(self.patient_id)
            .with_username(self.username)
            .with_proxies(self.use_proxy, self.proxy_file)
            .with_poll_interval(Duration::from_secs(self.interval)))
    }
}

fn default_session_file() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Could not determine the user config directory")?;
    Ok(config_dir
        .join("carelink-bridge")
        .join(FetchConfig::SESSION_FILENAME))
}
