//! Polling loop: one fetch cycle at a time, then wait for the interval.

use anyhow::Result;
use carelink_core::{CareLinkClient, CareLinkError, TelemetrySnapshot};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fetch once and print the snapshot as JSON.
pub async fn run_once(client: &mut CareLinkClient) -> Result<()> {
    match client.fetch().await {
        Ok(snapshot) => {
            info!("{}", summarize(&snapshot));
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Err(e) => {
            report_failure(&e);
            Err(e.into())
        }
    }
}

/// Fetch every `interval` until Ctrl-C. Failed cycles are logged and the
/// next cycle runs as scheduled.
pub async fn run(client: &mut CareLinkClient, interval: Duration) -> Result<()> {
    let mut shutdown = tokio::spawn(tokio::signal::ctrl_c());

    loop {
        match client.fetch().await {
            Ok(snapshot) => info!("{}", summarize(&snapshot)),
            Err(e) => report_failure(&e),
        }

        let stats = client.last_stats();
        if stats.proxy_swaps > 0 || stats.attempts > 1 {
            info!(
                "Cycle used {} attempts, {} proxy swaps, waited {:?}",
                stats.attempts, stats.proxy_swaps, stats.total_delay
            );
        }

        info!("Next fetch in {}s", interval.as_secs());
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

fn report_failure(err: &CareLinkError) {
    if err.is_credential_failure() {
        error!("CareLink credentials unusable, re-login required: {}", err);
    } else {
        warn!("Fetch cycle failed: {}", err);
    }
}

/// One-line description of a snapshot for the log.
pub fn summarize(snapshot: &TelemetrySnapshot) -> String {
    let sg = snapshot
        .last_sg_value()
        .map(|sg| sg.to_string())
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Fetched snapshot ({}, {:?}): last SG {}, {} readings, device {}",
        snapshot.role,
        snapshot.source,
        sg,
        snapshot.sg_count(),
        snapshot.device_family().unwrap_or("unknown")
    )
}
