//! Single-attempt publishing to the destination channel

use std::sync::Arc;
use tracing::{error, info};

use crate::platforms::Channel;
use crate::types::PublishOutcome;

/// Longest text excerpt written to the log
const PREVIEW_CHARS: usize = 80;

/// Sends post texts to the channel, turning failures into outcomes
///
/// A failed send is never retried here or anywhere else; the caller records
/// the outcome so the post is not attempted again.
#[derive(Clone)]
pub struct Publisher {
    channel: Arc<dyn Channel>,
}

impl Publisher {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Attempt exactly one send of `text`
    pub async fn publish(&self, text: &str) -> PublishOutcome {
        match self.channel.send_text(text).await {
            Ok(message_id) => {
                info!(
                    message_id = %message_id,
                    "Post published to {}: {}",
                    self.channel.name(),
                    preview(text)
                );
                PublishOutcome::sent(message_id)
            }
            Err(e) => {
                error!("Failed to publish post to {}: {}", self.channel.name(), e);
                PublishOutcome::failed(e.to_string())
            }
        }
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
