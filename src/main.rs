//! # SafeGuard - Personal Safety SOS Client
//!
//! Raises an emergency alert to a list of contacts from any of several
//! input channels (on-screen press, headset media key, embedding-shell
//! bridge), after a short cancellable countdown, with a best-effort
//! location fix attached.

mod alert;
mod app;
mod config;
pub mod constants;
mod contacts;
mod dispatch;
mod environment;
mod errors;
mod location;
mod models;
mod notifications;
mod safety;
mod triggers;
mod utils;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::Config;
use constants::{MAX_COUNTDOWN_SECS, MIN_COUNTDOWN_SECS};
use location::simulated::SimulatedFailure;

/// SafeGuard - personal safety SOS client
#[derive(Parser, Debug)]
#[command(name = "safeguard", version, about = "Personal safety SOS client")]
struct Cli {
    /// Config file (default: ~/.config/safeguard/config.toml)
    #[arg(long, short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Runtime identity string used for environment classification
    #[arg(long, value_name = "UA")]
    identity: Option<String>,

    /// Behave as an installed app in standalone display mode
    #[arg(long)]
    standalone: bool,

    /// Display name used in outgoing alerts
    #[arg(long, short = 'u', value_name = "NAME")]
    user: Option<String>,

    /// Countdown length in seconds before an alert is sent
    #[arg(long, value_name = "SECS")]
    countdown: Option<u32>,

    /// Simulated location fix latency in milliseconds
    #[arg(long, value_name = "MS")]
    location_delay_ms: Option<u64>,

    /// Make the simulated location backend fail
    #[arg(long, value_enum, value_name = "KIND")]
    location_failure: Option<SimulatedFailure>,

    /// Report that the host has no positioning capability
    #[arg(long)]
    no_geolocation: bool,

    /// Debug-level logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load and apply CLI overrides to config
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(ref identity) = cli.identity {
        config.environment.identity = identity.clone();
    }
    if cli.standalone {
        config.environment.display_standalone = true;
    }
    if let Some(ref user) = cli.user {
        config.user_name = Some(user.clone());
    }
    if let Some(secs) = cli.countdown {
        config.alert.countdown_secs = secs.clamp(MIN_COUNTDOWN_SECS, MAX_COUNTDOWN_SECS);
    }
    if let Some(ms) = cli.location_delay_ms {
        config.simulation.delay_ms = ms;
    }
    if cli.location_failure.is_some() {
        config.simulation.failure = cli.location_failure;
    }
    if cli.no_geolocation {
        config.environment.geolocation = false;
    }
    if cli.verbose {
        config.log_level = "debug".to_string();
    }

    // Logs go to stderr so they don't interleave with shell output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    for warning in &config.warnings {
        warn!("{}", warning);
    }

    let mut app = app::App::new(&config).await?;
    app.run().await
}
