//! Mock platform implementations for testing
//!
//! `MockFeed` serves scripted pages of wall posts and `MockChannel` records
//! what was sent to it, with the time of each send, and can be told to fail.
//! Both are cheap to clone; clones share their recorded state, so a test can
//! hand one clone to the relay and inspect the other.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::{PlatformError, Result};
use crate::platforms::{Channel, FeedSource, Inbox};
use crate::types::{IncomingMessage, WallPost};

pub type FeedPage = std::result::Result<Vec<WallPost>, PlatformError>;

/// Scripted wall feed
///
/// Pages are served in order; the last one keeps being served once the
/// script runs out, like a wall nobody posts to.
#[derive(Clone)]
pub struct MockFeed {
    pages: Arc<Mutex<VecDeque<FeedPage>>>,
    fetches: Arc<Mutex<Vec<Instant>>>,
    auth_succeeds: bool,
}

impl MockFeed {
    /// Feed that always returns the same page
    pub fn new(page: Vec<WallPost>) -> Self {
        Self::scripted(vec![Ok(page)])
    }

    /// Feed built from post texts, ids assigned in order
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(posts(texts))
    }

    pub fn scripted(pages: Vec<FeedPage>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(pages.into_iter().collect())),
            fetches: Arc::new(Mutex::new(Vec::new())),
            auth_succeeds: true,
        }
    }

    /// Feed whose every fetch fails with `error`
    pub fn failing(error: PlatformError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    /// Feed whose token is rejected at startup
    pub fn auth_failure() -> Self {
        Self {
            auth_succeeds: false,
            ..Self::scripted(vec![Ok(Vec::new())])
        }
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    /// When each fetch happened
    pub fn fetch_times(&self) -> Vec<Instant> {
        self.fetches.lock().unwrap().clone()
    }
}

/// Build wall posts from texts
pub fn posts(texts: &[&str]) -> Vec<WallPost> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| WallPost::new(i as i64 + 1, *text))
        .collect()
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn authenticate(&self) -> Result<()> {
        if self.auth_succeeds {
            Ok(())
        } else {
            Err(PlatformError::Authentication("Mock VK token rejected".to_string()).into())
        }
    }

    async fn fetch_recent(&self, limit: u32) -> Result<Vec<WallPost>> {
        self.fetches.lock().unwrap().push(Instant::now());

        let page = {
            let mut pages = self.pages.lock().unwrap();
            if pages.len() > 1 {
                pages.pop_front()
            } else {
                pages.front().cloned()
            }
        };

        match page {
            Some(Ok(mut posts)) => {
                posts.truncate(limit as usize);
                Ok(posts)
            }
            Some(Err(error)) => Err(error.into()),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "mock-vk"
    }
}

/// A message the mock channel accepted or rejected
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub text: String,
    pub at: Instant,
    pub accepted: bool,
}

/// Recording destination channel and bot inbox
#[derive(Clone)]
pub struct MockChannel {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing_texts: Arc<Mutex<HashSet<String>>>,
    fail_all: bool,
    auth_succeeds: bool,
    inbox: Arc<Mutex<VecDeque<InboxBatch>>>,
    replies: Arc<Mutex<Vec<(i64, String)>>>,
    fail_replies: bool,
    idle_poll: Duration,
}

pub type InboxBatch = std::result::Result<Vec<IncomingMessage>, PlatformError>;

impl Default for MockChannel {
    fn default() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            failing_texts: Arc::new(Mutex::new(HashSet::new())),
            fail_all: false,
            auth_succeeds: true,
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            replies: Arc::new(Mutex::new(Vec::new())),
            fail_replies: false,
            idle_poll: Duration::from_millis(10),
        }
    }
}

impl MockChannel {
    /// Channel that accepts every message
    pub fn success() -> Self {
        Self::default()
    }

    /// Channel that rejects every message
    pub fn post_failure() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Channel whose bot token is rejected
    pub fn auth_failure() -> Self {
        Self {
            auth_succeeds: false,
            ..Self::default()
        }
    }

    /// Reject messages with exactly this text
    pub fn fail_on(self, text: &str) -> Self {
        self.failing_texts.lock().unwrap().insert(text.to_string());
        self
    }

    /// Queue a batch for the inbox; an empty queue yields empty batches
    pub fn push_inbox(&self, batch: InboxBatch) {
        self.inbox.lock().unwrap().push_back(batch);
    }

    /// Make every reply fail
    pub fn failing_replies(self) -> Self {
        Self {
            fail_replies: true,
            ..self
        }
    }

    /// Every send attempt, accepted or not, in order
    pub fn attempts(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Texts of accepted messages, in order
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.accepted)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn send_call_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Replies as (chat id, text)
    pub fn replies(&self) -> Vec<(i64, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn authenticate(&self) -> Result<()> {
        if self.auth_succeeds {
            Ok(())
        } else {
            Err(PlatformError::Authentication("Mock bot token rejected".to_string()).into())
        }
    }

    async fn send_text(&self, text: &str) -> Result<String> {
        let accepted = !self.fail_all && !self.failing_texts.lock().unwrap().contains(text);

        let message_id = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(SentMessage {
                text: text.to_string(),
                at: Instant::now(),
                accepted,
            });
            sent.len()
        };

        if accepted {
            Ok(message_id.to_string())
        } else {
            Err(PlatformError::Posting("Mock channel rejected the message".to_string()).into())
        }
    }

    fn name(&self) -> &str {
        "mock-telegram"
    }
}

#[async_trait]
impl Inbox for MockChannel {
    async fn next_messages(&self) -> Result<Vec<IncomingMessage>> {
        let batch = self.inbox.lock().unwrap().pop_front();

        match batch {
            Some(Ok(messages)) => Ok(messages),
            Some(Err(error)) => Err(error.into()),
            None => {
                sleep(self.idle_poll).await;
                Ok(Vec::new())
            }
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()> {
        if self.fail_replies {
            return Err(PlatformError::Network("Mock reply failed".to_string()).into());
        }

        self.replies
            .lock()
            .unwrap()
            .push((message.chat_id, text.to_string()));
        Ok(())
    }
}
