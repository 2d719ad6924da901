//! Drives a real support session against the configured control endpoint.
//!
//! The streaming side runs in-process, so only the control plane talks to
//! the network.

mod config;
mod logging;

use dome_client::SessionBuilder;
use dome_core::DomeError;
use dome_transport::InMemoryStreamingChannel;
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            eprintln!("Required: DOME_API_ID and DOME_API_KEY");
            std::process::exit(2);
        }
    };
    info!(?config, "starting smoke run");

    if let Err(err) = run(config).await {
        error!(error = %err, "smoke run failed");
        eprintln!("Smoke run failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), DomeError> {
    let session = SessionBuilder::new(
        config.api_id.clone(),
        config.api_key.clone(),
        config.device_id.clone(),
        config.push_token.clone(),
    )
    .config(config.session_config())
    .on_state_changed(|state| info!(?state, "session state"))
    .on_diagnostic(|message| warn!(%message, "session diagnostic"))
    .initialize_http(InMemoryStreamingChannel::new())
    .await?;

    if let Some(warning) = session.bootstrap_warning() {
        warn!(error = %warning, "history unavailable");
    }
    println!("Registered as {}", session.client_id());
    for entry in session.snapshot_log() {
        let when = entry
            .timestamp
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_owned());
        println!("[{when}] {:?}: {}", entry.kind, entry.text);
    }

    if let Some(text) = config.message.as_deref() {
        let receipt = session.send_message(text).await?;
        match receipt.entry() {
            Some(entry) => println!("Sent, stored as {}", entry.id),
            None => println!("Sent"),
        }
    }

    session.close().await;
    Ok(())
}
