//! Conversation list command

use anyhow::Result;

use parley_core::Config;

use crate::output::Output;

/// Print conversations, most recently active first
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let coordinator = super::open(config).await?;

    if let Some(me) = coordinator.local_user() {
        output.print_conversations(&coordinator.conversations(), &me);
    }

    coordinator.shutdown().await;
    Ok(())
}
