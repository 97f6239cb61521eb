//! Core types for Wallcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post read from a VK community wall
///
/// Only `text` takes part in deduplication; the remaining fields are kept
/// for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallPost {
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: String,
}

impl WallPost {
    pub fn new(id: i64, text: impl Into<String>) -> Self {
        Self {
            id,
            owner_id: 0,
            date: 0,
            text: text.into(),
        }
    }

    /// Publication time reported by VK, if it is a valid timestamp
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.date, 0)
    }
}

/// A row of the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: i64,
    pub post_text: String,
    pub published_in_telegram: bool,
}

/// Result of a single publish attempt
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub ok: bool,
    /// Telegram message id of the sent message
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl PublishOutcome {
    pub fn sent(message_id: String) -> Self {
        Self {
            ok: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Counters for one fetch-filter-publish-record pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub published: usize,
    pub failed: usize,
}

impl CycleReport {
    /// Posts a publish attempt was made for during the cycle
    pub fn attempted(&self) -> usize {
        self.published + self.failed
    }
}

/// A text message received by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub text: Option<String>,
}
