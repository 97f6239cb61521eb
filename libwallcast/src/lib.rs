//! Wallcast - relay a VK community wall into a Telegram channel
//!
//! This library reads the newest posts of a VK wall, republishes the ones
//! it has not seen before to a Telegram channel and keeps a SQLite record
//! of every attempt so nothing is sent twice.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod relay;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{Result, WallcastError};
pub use relay::{RelayContext, Shutdown};
pub use types::{CycleReport, PostRecord, PublishOutcome, WallPost};
