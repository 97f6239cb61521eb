//! Telegram platform implementation
//!
//! Publishes plain text to a channel through the Bot API and receives the
//! bot's own messages with `getUpdates` long polling.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::config::{RelayConfig, TelegramConfig};
use crate::error::{PlatformError, Result};
use crate::platforms::{Channel, Inbox};
use crate::types::IncomingMessage;

/// Maximum length of a text message
pub const MESSAGE_CHAR_LIMIT: usize = 4096;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

/// Map a failed Bot API call to a PlatformError
fn map_telegram_error(
    method: &str,
    code: u16,
    description: &str,
    retry_after: Option<u64>,
) -> PlatformError {
    let message = format!("Telegram {} failed ({}): {}", method, code, description);

    match code {
        401 | 403 => PlatformError::Authentication(message),
        429 => match retry_after {
            Some(secs) => PlatformError::RateLimit(format!("{}, retry after {}s", message, secs)),
            None => PlatformError::RateLimit(message),
        },
        400 => PlatformError::Validation(message),
        _ if method == "sendMessage" => PlatformError::Posting(message),
        _ => PlatformError::Api(message),
    }
}

/// Bot API URLs embed the token, so the URL is stripped from transport errors
fn map_transport_error(error: reqwest::Error, method: &str) -> PlatformError {
    let error = error.without_url();
    if error.is_timeout() {
        PlatformError::Network(format!("Telegram {} timed out: {}", method, error))
    } else {
        PlatformError::Network(format!("Telegram {} request failed: {}", method, error))
    }
}

/// Check that `text` can be sent as a single message
pub fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(PlatformError::Validation("Message text is empty".to_string()).into());
    }

    let length = text.chars().count();
    if length > MESSAGE_CHAR_LIMIT {
        return Err(PlatformError::Validation(format!(
            "Message text exceeds Telegram's {} character limit (current: {} characters)",
            MESSAGE_CHAR_LIMIT, length
        ))
        .into());
    }

    Ok(())
}

/// Telegram Bot API client
#[derive(Debug)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    bot_token: SecretString,
    channel_id: String,
    http_timeout: Duration,
    poll_timeout: u64,
    next_update: AtomicI64,
}

impl TelegramClient {
    /// Create a client posting to `channel_id` (`@name` or numeric id)
    pub fn new(
        api_url: String,
        bot_token: String,
        channel_id: String,
        http_timeout: Duration,
        poll_timeout: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            bot_token: SecretString::from(bot_token),
            channel_id,
            http_timeout,
            poll_timeout,
            next_update: AtomicI64::new(0),
        })
    }

    pub fn from_config(config: &TelegramConfig, relay: &RelayConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            config.bot_token.clone(),
            config.channel_id.clone(),
            Duration::from_secs(relay.http_timeout),
            config.poll_timeout,
        )
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let url = format!(
            "{}/bot{}/{}",
            self.api_url,
            self.bot_token.expose_secret(),
            method
        );

        let mut request = self.client.post(&url).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, method))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, method))?;

        let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            PlatformError::Api(format!(
                "Unexpected Telegram response to {} (HTTP {}): {}",
                method, status, e
            ))
        })?;

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            failed => {
                let code = failed.error_code.unwrap_or_else(|| status.as_u16());
                let description = failed
                    .description
                    .unwrap_or_else(|| "no description".to_string());
                let retry_after = failed.parameters.and_then(|p| p.retry_after);
                Err(map_telegram_error(method, code, &description, retry_after).into())
            }
        }
    }

    async fn send_message(&self, payload: serde_json::Value) -> Result<Message> {
        self.call("sendMessage", &payload, None).await
    }
}

#[async_trait]
impl Channel for TelegramClient {
    async fn authenticate(&self) -> Result<()> {
        let me: User = self.call("getMe", &json!({}), None).await?;

        tracing::debug!(
            "Telegram bot authenticated: id={} username={}",
            me.id,
            me.username.as_deref().unwrap_or("-")
        );
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<String> {
        validate_text(text)?;

        let message = self
            .send_message(json!({
                "chat_id": self.channel_id,
                "text": text,
            }))
            .await?;

        Ok(message.message_id.to_string())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[async_trait]
impl Inbox for TelegramClient {
    async fn next_messages(&self) -> Result<Vec<IncomingMessage>> {
        let offset = self.next_update.load(Ordering::Acquire);

        let mut payload = json!({
            "timeout": self.poll_timeout,
            "allowed_updates": ["message"],
        });
        if offset > 0 {
            payload["offset"] = json!(offset);
        }

        // The request must outlive the long poll itself
        let timeout = self.http_timeout + Duration::from_secs(self.poll_timeout);
        let updates: Vec<Update> = self.call("getUpdates", &payload, Some(timeout)).await?;

        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.next_update.store(last + 1, Ordering::Release);
        }

        Ok(updates
            .into_iter()
            .filter_map(|update| {
                update.message.map(|message| IncomingMessage {
                    update_id: update.update_id,
                    chat_id: message.chat.id,
                    message_id: message.message_id,
                    text: message.text,
                })
            })
            .collect())
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()> {
        self.send_message(json!({
            "chat_id": message.chat_id,
            "text": text,
            "reply_parameters": {"message_id": message.message_id},
        }))
        .await?;

        Ok(())
    }
}
