//! Platform abstraction and implementations
//!
//! The relay talks to two platforms through narrow traits: a [`FeedSource`]
//! it reads wall posts from and a [`Channel`] it republishes them to. The bot
//! side of the destination platform is an [`Inbox`] the command listener
//! polls for incoming messages.
//!
//! # Examples
//!
//! ```no_run
//! use libwallcast::config::Config;
//! use libwallcast::platforms::{vk::VkClient, FeedSource};
//!
//! # async fn example() -> libwallcast::Result<()> {
//! let config = Config::load()?;
//! let vk = VkClient::from_config(&config.vk, &config.relay)?;
//! vk.authenticate().await?;
//!
//! for post in vk.fetch_recent(100).await? {
//!     println!("{}: {}", post.id, post.text);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IncomingMessage, WallPost};

pub mod mock;
pub mod telegram;
pub mod vk;

/// Source of wall posts
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Verify credentials and the configured group
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` if the token is rejected or
    /// the group cannot be read with it.
    async fn authenticate(&self) -> Result<()>;

    /// Fetch the most recent `limit` posts in the order the platform returns them
    ///
    /// Only a single page is requested.
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<WallPost>>;

    /// Lowercase platform identifier (e.g. "vk")
    fn name(&self) -> &str;
}

/// Destination channel posts are republished to
#[async_trait]
pub trait Channel: Send + Sync {
    /// Verify the bot credentials
    async fn authenticate(&self) -> Result<()>;

    /// Send `text` to the configured channel, returning the platform message id
    ///
    /// Exactly one send is attempted.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Validation` if the text cannot be sent as-is
    /// - `PlatformError::Authentication` if the bot may not post to the channel
    /// - `PlatformError::RateLimit`, `PlatformError::Network`, `PlatformError::Posting`
    ///   for the remaining failures
    async fn send_text(&self, text: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Incoming bot messages
#[async_trait]
pub trait Inbox: Send + Sync {
    /// Wait for the next batch of messages
    ///
    /// Implementations track their own position, so each message is returned
    /// once. May return an empty batch when the long poll times out.
    async fn next_messages(&self) -> Result<Vec<IncomingMessage>>;

    /// Reply to `message` in the chat it came from
    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<()>;
}
