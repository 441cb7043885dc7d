//! Command handlers

pub mod config;
pub mod conversations;
pub mod messages;
pub mod send;
pub mod start;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};

use parley_core::{Config, SyncCoordinator, SyncError};

/// Start a sync session and make sure the conversation list is loaded
pub async fn open(config: &Config) -> Result<SyncCoordinator> {
    let coordinator =
        SyncCoordinator::from_config(config).context("Failed to set up the sync session")?;
    coordinator
        .start()
        .await
        .map_err(with_hint)
        .context("Failed to start sync")?;

    // The initial fetch is best effort inside the coordinator; here we need it
    if !coordinator.has_synced() {
        coordinator
            .resync()
            .await
            .map_err(with_hint)
            .context("Failed to fetch conversations")?;
    }
    Ok(coordinator)
}

/// Attach the recovery suggestion to a sync error
pub fn with_hint(error: SyncError) -> anyhow::Error {
    match error.recovery_suggestion() {
        Some(hint) => anyhow::anyhow!("{}\n{}", error, hint),
        None => anyhow::Error::new(error),
    }
}
