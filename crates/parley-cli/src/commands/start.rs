//! Start (create-or-get) a conversation

use anyhow::{Context, Result};

use parley_core::{Config, UserId};

use crate::output::Output;

/// Get or create the direct conversation with a participant
pub async fn start(config: &Config, participant: String, output: &Output) -> Result<()> {
    let coordinator = super::open(config).await?;
    let participant = UserId::new(participant);

    let result = coordinator.create_conversation(&participant).await;
    coordinator.shutdown().await;

    let conversation = result
        .map_err(super::with_hint)
        .with_context(|| format!("Failed to start a conversation with {}", participant))?;

    if let Some(me) = coordinator.local_user() {
        output.print_conversation(&conversation, &me);
    }
    Ok(())
}
