//! The bot's only command: a fixed greeting for `/start`

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::platforms::Inbox;
use crate::relay::Shutdown;

pub const START_REPLY: &str =
    "Привет! Я бот для парсинга постов из группы ВКонтакте и их публикации в телеграм-канале.";

/// Wait after a failed `getUpdates` before polling again
pub const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CommandResponder {
    reply: String,
}

impl Default for CommandResponder {
    fn default() -> Self {
        Self::new(START_REPLY)
    }
}

impl CommandResponder {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> Self {
        match &config.start_reply {
            Some(reply) if !reply.trim().is_empty() => Self::new(reply.clone()),
            _ => Self::default(),
        }
    }

    /// Reply for `text`, if it is the start command
    ///
    /// Accepts `/start` and `/start@botname`; anything after the command is ignored.
    pub fn respond(&self, text: &str) -> Option<&str> {
        let command = text.split_whitespace().next()?;
        let name = command.split('@').next()?;

        if name == "/start" {
            Some(&self.reply)
        } else {
            None
        }
    }
}

/// Answer commands until shutdown
///
/// Never fails: polling errors are logged and retried after `retry_delay`,
/// reply errors are logged and dropped.
pub async fn run_listener(
    inbox: Arc<dyn Inbox>,
    responder: CommandResponder,
    mut shutdown: Shutdown,
    retry_delay: Duration,
) {
    info!("Command listener started");

    loop {
        let batch = tokio::select! {
            batch = inbox.next_messages() => batch,
            _ = shutdown.wait() => break,
        };

        match batch {
            Ok(messages) => {
                for message in messages {
                    let Some(reply) = message.text.as_deref().and_then(|t| responder.respond(t))
                    else {
                        continue;
                    };

                    match inbox.reply(&message, reply).await {
                        Ok(()) => debug!("Answered /start in chat {}", message.chat_id),
                        Err(e) => warn!("Failed to answer chat {}: {}", message.chat_id, e),
                    }
                }
            }
            Err(e) => {
                warn!("Failed to poll bot updates: {}", e);
                if !shutdown.sleep(retry_delay).await {
                    break;
                }
            }
        }
    }

    info!("Command listener stopped");
}
