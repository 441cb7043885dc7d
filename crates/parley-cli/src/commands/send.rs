//! Send command

use anyhow::{bail, Result};

use parley_core::{Config, ConversationId};

use crate::output::Output;

/// Send one message
///
/// On failure the text is echoed back so it can be resent.
pub async fn send(
    config: &Config,
    conversation_id: String,
    text: String,
    output: &Output,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Refusing to send an empty message");
    }

    let coordinator = super::open(config).await?;
    let conversation_id = ConversationId::new(conversation_id);

    let result = coordinator.send_message(&conversation_id, &text).await;
    coordinator.shutdown().await;

    match result {
        Ok(message) => {
            output.print_message(&message);
            Ok(())
        }
        Err(failure) => {
            let hint = failure
                .source
                .recovery_suggestion()
                .map(|h| format!("\n{}", h))
                .unwrap_or_default();
            bail!(
                "{}{}\nYour message was not sent:\n  {}",
                failure,
                hint,
                failure.content
            );
        }
    }
}
