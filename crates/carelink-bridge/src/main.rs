//! CareLink Bridge - polls CareLink for the latest device telemetry.
//!
//! Configuration comes from command line flags or `CARELINK_*` environment
//! variables. The session file must already exist; it is produced by a
//! separate login flow.

mod args;
mod poller;

use anyhow::Result;
use args::Args;
use carelink_core::CareLinkClient;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG takes precedence over --debug
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting CareLink bridge");

    let once = args.once;
    let config = args.into_config()?;
    info!("Session file: {}", config.session_file.display());

    let mut client = CareLinkClient::from_config(&config)?;
    info!("CareLink server: {}", client.endpoints().base);

    if once {
        poller::run_once(&mut client).await
    } else {
        poller::run(&mut client, config.poll_interval).await
    }
}
