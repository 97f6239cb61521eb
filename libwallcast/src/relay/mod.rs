//! The relay: sync loop, failure supervision and the command listener
//!
//! [`RelayContext`] bundles everything the relay needs, built once at
//! startup and handed to the loop and the listener. Both stop when the
//! shared [`Shutdown`] signal fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::platforms::telegram::TelegramClient;
use crate::platforms::vk::VkClient;
use crate::platforms::{Channel, FeedSource, Inbox};

pub mod commands;
pub mod publisher;
pub mod supervisor;
pub mod sync;

use commands::{run_listener, CommandResponder, LISTENER_RETRY_DELAY};
use publisher::Publisher;
use supervisor::Supervisor;
use sync::{Pacing, SyncLoop};

/// Receiving end of the shutdown signal
///
/// The signal only ever goes from `false` to `true`. A dropped sender counts
/// as a shutdown request.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (watch::Sender<bool>, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (tx, Shutdown { rx })
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleep for `duration`; false if shutdown was requested first
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

/// Shared handles for one relay process
#[derive(Clone)]
pub struct RelayContext {
    config: Arc<Config>,
    db: Database,
    feed: Arc<dyn FeedSource>,
    channel: Arc<dyn Channel>,
    inbox: Arc<dyn Inbox>,
}

impl RelayContext {
    pub fn new(
        config: Config,
        db: Database,
        feed: Arc<dyn FeedSource>,
        channel: Arc<dyn Channel>,
        inbox: Arc<dyn Inbox>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            feed,
            channel,
            inbox,
        }
    }

    /// Open the record store and build the VK and Telegram clients
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = Database::new(&config.database.path).await?;
        let vk = VkClient::from_config(&config.vk, &config.relay)?;
        let telegram = Arc::new(TelegramClient::from_config(&config.telegram, &config.relay)?);
        info!(
            "Relaying wall {} to Telegram channel {}",
            vk.owner_id(),
            telegram.channel_id()
        );

        Ok(Self::new(config, db, Arc::new(vk), telegram.clone(), telegram))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Check both sets of credentials; either failing is fatal at startup
    pub async fn authenticate(&self) -> Result<()> {
        self.channel.authenticate().await?;
        info!("Authenticated with {}", self.channel.name());

        self.feed.authenticate().await?;
        info!("Authenticated with {}", self.feed.name());

        Ok(())
    }

    pub fn sync_loop(&self) -> SyncLoop {
        SyncLoop::new(
            self.feed.clone(),
            self.db.clone(),
            Publisher::new(self.channel.clone()),
            Pacing::from(&self.config.relay),
            self.config.vk.fetch_count,
        )
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::from_config(&self.config.relay)
    }

    /// Start answering bot commands in the background
    pub fn spawn_listener(&self, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(run_listener(
            self.inbox.clone(),
            CommandResponder::from_config(&self.config.telegram),
            shutdown,
            LISTENER_RETRY_DELAY,
        ))
    }

    /// Run the listener and the sync loop until shutdown or a fatal error
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        let listener = self.spawn_listener(shutdown.clone());

        let mut sync = self.sync_loop().with_shutdown(shutdown);
        let mut supervisor = self.supervisor();
        let result = sync.run(&mut supervisor).await;

        // The loop may stop on its own under the exit policy
        listener.abort();
        let _ = listener.await;

        result
    }
}
