//! # Cherut Login Console
//!
//! Interactive sign-in form demonstrating progressive lockout.

mod authenticator;
mod background;
mod config;
mod console;
mod state;
mod telemetry;

use config::AppConfig;
use console::Outcome;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env();
    tracing::info!(
        action = %config.action,
        storage = ?config.storage,
        prune_schedule = %config.prune_schedule,
        "Starting Cherut login console"
    );

    let state = AppState::new(&config).await?;

    // Clean out leftovers from earlier runs before the first check.
    background::prune_once(&state.service).await;

    #[cfg(feature = "scheduler")]
    let mut scheduler = background::PruneScheduler::start(
        background::SchedulerConfig::from_env(),
        &config.prune_schedule,
        state.service.clone(),
    )
    .await?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let outcome = console::run(&state, stdin, &mut stdout).await;

    #[cfg(feature = "scheduler")]
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Failed to stop scheduler");
    }

    match outcome? {
        Outcome::SignedIn(session) => {
            tracing::info!(session_id = %session.id, "Sign-in completed");
        }
        Outcome::Closed => tracing::info!("Input closed"),
    }

    Ok(())
}
