//! Message history command

use anyhow::{Context, Result};

use parley_core::{Config, ConversationId};

use crate::output::Output;

/// Open a conversation and print its messages
///
/// `page` counts backwards: page 1 is the newest page, and every page up
/// to `page` is loaded.
pub async fn show(
    config: &Config,
    conversation_id: String,
    page: u32,
    output: &Output,
) -> Result<()> {
    let coordinator = super::open(config).await?;
    let conversation_id = ConversationId::new(conversation_id);

    coordinator
        .set_active_conversation(Some(&conversation_id))
        .await
        .map_err(super::with_hint)
        .with_context(|| format!("Failed to open conversation {}", conversation_id))?;

    for older in 2..=page {
        let changed = coordinator
            .load_older_messages(&conversation_id, older)
            .await
            .map_err(super::with_hint)
            .with_context(|| format!("Failed to load page {}", older))?;
        if changed == 0 {
            break;
        }
    }

    output.print_messages(&coordinator.messages(&conversation_id));
    coordinator.shutdown().await;
    Ok(())
}
