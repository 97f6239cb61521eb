//! The fetch, filter, publish, record loop
//!
//! One cycle reads the newest page of the wall and walks it in the order the
//! feed returned it. Posts whose exact text already has a record are skipped;
//! every other post gets exactly one publish attempt, and its outcome is
//! recorded before the relay waits and moves on. Records are written even for
//! failed attempts, so a rejected post is never retried.
//!
//! ```text
//! Fetching -> Filtering -> Publishing(i) -> Recording(i) -> Pacing(i) -> Filtering ...
//!                 \__________________________________________________________> Sleeping
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::db::Database;
use crate::error::Result;
use crate::platforms::FeedSource;
use crate::relay::publisher::Publisher;
use crate::relay::supervisor::{Supervisor, Verdict};
use crate::relay::Shutdown;
use crate::types::CycleReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Fetching,
    Filtering,
    Publishing(usize),
    Recording(usize),
    Pacing(usize),
    Sleeping,
}

/// Waits applied by the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between cycles
    pub poll_interval: Duration,
    /// After every publish attempt
    pub post_delay: Duration,
    /// Extra wait after a successful publish
    pub publish_delay: Duration,
}

impl From<&RelayConfig> for Pacing {
    fn from(relay: &RelayConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(relay.poll_interval),
            post_delay: Duration::from_secs(relay.post_delay),
            publish_delay: Duration::from_secs(relay.publish_delay),
        }
    }
}

impl Pacing {
    /// No waiting at all, for one-shot runs and tests
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            post_delay: Duration::ZERO,
            publish_delay: Duration::ZERO,
        }
    }

    fn after_publish(&self, published: bool) -> Duration {
        if published {
            self.publish_delay + self.post_delay
        } else {
            self.post_delay
        }
    }
}

pub struct SyncLoop {
    feed: Arc<dyn FeedSource>,
    db: Database,
    publisher: Publisher,
    pacing: Pacing,
    fetch_count: u32,
    shutdown: Option<Shutdown>,
    state: SyncState,
}

impl SyncLoop {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        db: Database,
        publisher: Publisher,
        pacing: Pacing,
        fetch_count: u32,
    ) -> Self {
        Self {
            feed,
            db,
            publisher,
            pacing,
            fetch_count,
            shutdown: None,
            state: SyncState::Sleeping,
        }
    }

    /// Stop between posts and during waits once `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    fn transition(&mut self, next: SyncState) {
        debug!(from = ?self.state, to = ?next, "sync state change");
        self.state = next;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(Shutdown::is_requested)
    }

    /// Wait for `duration`; false if shutdown cut the wait short
    async fn pause(&mut self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.shutdown_requested();
        }

        match self.shutdown.as_mut() {
            Some(shutdown) => shutdown.sleep(duration).await,
            None => {
                sleep(duration).await;
                true
            }
        }
    }

    /// Run one fetch, filter, publish, record pass
    ///
    /// A fetch error aborts the cycle before anything is written. A store
    /// error aborts it at the failing post; posts before it keep their
    /// records, posts after it are picked up by a later cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        self.transition(SyncState::Fetching);
        let posts = self.feed.fetch_recent(self.fetch_count).await?;
        debug!("Fetched {} post(s) from {}", posts.len(), self.feed.name());

        let mut report = CycleReport {
            fetched: posts.len(),
            ..Default::default()
        };

        self.transition(SyncState::Filtering);
        for (i, post) in posts.iter().enumerate() {
            if self.shutdown_requested() {
                info!("Shutdown requested, leaving the rest of this page for later");
                break;
            }

            if self.db.post_exists(&post.text).await? {
                report.skipped += 1;
                continue;
            }

            self.transition(SyncState::Publishing(i));
            debug!(
                post_id = post.id,
                posted_at = ?post.published_at(),
                "Publishing new wall post"
            );
            let outcome = self.publisher.publish(&post.text).await;

            self.transition(SyncState::Recording(i));
            self.db.save_post(&post.text, outcome.ok).await?;
            if outcome.ok {
                report.published += 1;
            } else {
                report.failed += 1;
            }

            self.transition(SyncState::Pacing(i));
            let wait = self.pacing.after_publish(outcome.ok);
            if !self.pause(wait).await {
                break;
            }

            self.transition(SyncState::Filtering);
        }

        Ok(report)
    }

    /// Cycle until shutdown, consulting `supervisor` after every cycle
    ///
    /// Returns an error only when the supervisor decides to stop.
    pub async fn run(&mut self, supervisor: &mut Supervisor) -> Result<()> {
        info!(
            "Relay loop started: polling {} every {}s",
            self.feed.name(),
            self.pacing.poll_interval.as_secs()
        );

        while !self.shutdown_requested() {
            let wait = match self.run_cycle().await {
                Ok(report) => {
                    info!(
                        fetched = report.fetched,
                        skipped = report.skipped,
                        attempted = report.attempted(),
                        published = report.published,
                        failed = report.failed,
                        "Sync cycle complete"
                    );
                    if report.failed > 0 {
                        warn!(
                            "{} post(s) could not be published and will not be retried",
                            report.failed
                        );
                    }
                    supervisor.on_success()
                }
                Err(e) => match supervisor.on_error() {
                    Verdict::Sleep(wait) => {
                        error!(
                            "Sync cycle aborted: {}. Retrying in {}s (policy: {})",
                            e,
                            wait.as_secs(),
                            supervisor.policy()
                        );
                        wait
                    }
                    Verdict::Stop => {
                        error!(
                            "Sync cycle aborted: {}. Stopping relay (policy: {})",
                            e,
                            supervisor.policy()
                        );
                        return Err(e);
                    }
                },
            };

            self.transition(SyncState::Sleeping);
            if !self.pause(wait).await {
                break;
            }
        }

        info!("Relay loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlatformError, WallcastError};
    use crate::platforms::mock::{posts, MockChannel, MockFeed};
    use crate::relay::supervisor::FetchErrorPolicy;

    async fn sync_loop(
        feed: MockFeed,
        channel: MockChannel,
        pacing: Pacing,
    ) -> (SyncLoop, Database) {
        let db = Database::in_memory().await.unwrap();
        let sync = SyncLoop::new(
            Arc::new(feed),
            db.clone(),
            Publisher::new(Arc::new(channel)),
            pacing,
            100,
        );
        (sync, db)
    }

    #[tokio::test]
    async fn test_new_posts_published_in_feed_order() {
        let channel = MockChannel::success();
        let (mut sync, db) =
            sync_loop(MockFeed::with_texts(&["A", "B"]), channel.clone(), Pacing::immediate()).await;

        let report = sync.run_cycle().await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.published, 2);
        assert_eq!(channel.sent_texts(), vec!["A".to_string(), "B".to_string()]);
        assert!(db.post_exists("A").await.unwrap());
        assert!(db.post_exists("B").await.unwrap());
        assert_eq!(sync.state(), SyncState::Filtering);
    }

    #[tokio::test]
    async fn test_known_texts_are_skipped() {
        let channel = MockChannel::success();
        let (mut sync, db) =
            sync_loop(MockFeed::with_texts(&["A", "C"]), channel.clone(), Pacing::immediate()).await;
        db.save_post("A", true).await.unwrap();

        let report = sync.run_cycle().await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.published, 1);
        assert_eq!(channel.sent_texts(), vec!["C".to_string()]);
        assert_eq!(db.count_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_recorded_and_not_retried() {
        let channel = MockChannel::success().fail_on("B");
        let (mut sync, db) =
            sync_loop(MockFeed::with_texts(&["A", "B"]), channel.clone(), Pacing::immediate()).await;

        let first = sync.run_cycle().await.unwrap();
        let second = sync.run_cycle().await.unwrap();

        assert_eq!(first.failed, 1);
        assert_eq!(second.skipped, 2);
        assert_eq!(channel.send_call_count(), 2);

        let records = db.get_records(10).await.unwrap();
        let b = records.iter().find(|r| r.post_text == "B").unwrap();
        assert!(!b.published_in_telegram);
    }

    #[tokio::test]
    async fn test_fetch_error_writes_nothing() {
        let channel = MockChannel::success();
        let (mut sync, db) = sync_loop(
            MockFeed::failing(PlatformError::Network("timeout".to_string())),
            channel.clone(),
            Pacing::immediate(),
        )
        .await;

        let result = sync.run_cycle().await;

        assert!(matches!(
            result,
            Err(WallcastError::Platform(PlatformError::Network(_)))
        ));
        assert_eq!(db.count_records().await.unwrap(), 0);
        assert_eq!(channel.send_call_count(), 0);
        assert_eq!(sync.state(), SyncState::Fetching);
    }

    #[tokio::test]
    async fn test_empty_page_is_a_quiet_cycle() {
        let (mut sync, db) =
            sync_loop(MockFeed::new(Vec::new()), MockChannel::success(), Pacing::immediate()).await;

        let report = sync.run_cycle().await.unwrap();

        assert_eq!(report, CycleReport::default());
        assert_eq!(db.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_text_within_page_published_once() {
        let channel = MockChannel::success();
        let (mut sync, _db) = sync_loop(
            MockFeed::new(posts(&["same", "same"])),
            channel.clone(),
            Pacing::immediate(),
        )
        .await;

        let report = sync.run_cycle().await.unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(channel.sent_texts(), vec!["same".to_string()]);
    }

    #[tokio::test]
    async fn test_pacing_between_posts() {
        let pacing = Pacing {
            poll_interval: Duration::ZERO,
            post_delay: Duration::from_millis(30),
            publish_delay: Duration::from_millis(30),
        };
        let channel = MockChannel::success().fail_on("B");
        let (mut sync, _db) =
            sync_loop(MockFeed::with_texts(&["A", "B", "C"]), channel.clone(), pacing).await;

        sync.run_cycle().await.unwrap();

        let attempts = channel.attempts();
        assert_eq!(attempts.len(), 3);
        // A succeeded: both delays before B
        assert!(attempts[1].at - attempts[0].at >= Duration::from_millis(60));
        // B failed: only the post delay before C
        assert!(attempts[2].at - attempts[1].at >= Duration::from_millis(30));
        assert_eq!(sync.state(), SyncState::Filtering);
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_posts() {
        let (tx, shutdown) = Shutdown::channel();
        let channel = MockChannel::success();
        let pacing = Pacing {
            post_delay: Duration::from_secs(60),
            ..Pacing::immediate()
        };
        let (sync, db) =
            sync_loop(MockFeed::with_texts(&["A", "B"]), channel.clone(), pacing).await;
        let mut sync = sync.with_shutdown(shutdown);

        let handle = tokio::spawn(async move {
            let report = sync.run_cycle().await;
            (report, sync.state())
        });

        for _ in 0..200 {
            if channel.send_call_count() == 1 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        let (report, state) = handle.await.unwrap();
        assert_eq!(report.unwrap().published, 1);
        assert_eq!(state, SyncState::Pacing(0));
        assert_eq!(channel.sent_texts(), vec!["A".to_string()]);
        assert_eq!(db.count_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_keeps_polling_after_fetch_errors() {
        let (tx, shutdown) = Shutdown::channel();
        let feed = MockFeed::scripted(vec![
            Err(PlatformError::Network("down".to_string())),
            Ok(posts(&["A"])),
        ]);
        let channel = MockChannel::success();
        let pacing = Pacing {
            poll_interval: Duration::from_millis(20),
            ..Pacing::immediate()
        };
        let (sync, _db) = sync_loop(feed.clone(), channel.clone(), pacing).await;
        let mut sync = sync.with_shutdown(shutdown);
        let mut supervisor = Supervisor::new(
            FetchErrorPolicy::Continue,
            pacing.poll_interval,
            Duration::from_millis(20),
            Duration::from_millis(100),
        );

        let handle = tokio::spawn(async move { sync.run(&mut supervisor).await });

        for _ in 0..200 {
            if feed.fetch_call_count() >= 3 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(channel.sent_texts(), vec!["A".to_string()]);

        let times = feed.fetch_times();
        assert!(times.len() >= 3);
        assert!(times[1] - times[0] >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_run_sleeps_poll_interval_after_successful_cycle() {
        let (tx, shutdown) = Shutdown::channel();
        let feed = MockFeed::with_texts(&["A", "B"]);
        let channel = MockChannel::success();
        let pacing = Pacing {
            poll_interval: Duration::from_millis(80),
            post_delay: Duration::from_millis(10),
            publish_delay: Duration::from_millis(10),
        };
        let (sync, db) = sync_loop(feed.clone(), channel.clone(), pacing).await;
        let mut sync = sync.with_shutdown(shutdown);
        let mut supervisor = Supervisor::new(
            FetchErrorPolicy::Continue,
            pacing.poll_interval,
            Duration::from_millis(20),
            Duration::from_millis(100),
        );

        let handle = tokio::spawn(async move { sync.run(&mut supervisor).await });

        for _ in 0..200 {
            if feed.fetch_call_count() >= 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        assert!(handle.await.unwrap().is_ok());

        let attempts = channel.attempts();
        assert_eq!(channel.sent_texts(), vec!["A".to_string(), "B".to_string()]);
        assert!(attempts[1].at - attempts[0].at >= Duration::from_millis(20));

        let times = feed.fetch_times();
        assert!(times.len() >= 2);
        assert!(times[1] - attempts[1].at >= pacing.poll_interval);
        assert_eq!(db.count_records().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_exit_policy_surfaces_error() {
        let (_tx, shutdown) = Shutdown::channel();
        let (sync, _db) = sync_loop(
            MockFeed::failing(PlatformError::Api("group is blocked".to_string())),
            MockChannel::success(),
            Pacing::immediate(),
        )
        .await;
        let mut sync = sync.with_shutdown(shutdown);
        let mut supervisor = Supervisor::new(
            FetchErrorPolicy::Exit,
            Duration::ZERO,
            Duration::ZERO,
            Duration::ZERO,
        );

        let result = sync.run(&mut supervisor).await;

        assert!(matches!(
            result,
            Err(WallcastError::Platform(PlatformError::Api(_)))
        ));
    }
}
