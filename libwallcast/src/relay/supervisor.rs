//! What the relay does after a cycle fails
//!
//! A fetch or store error aborts the cycle it happens in. The supervisor
//! then decides between waiting for the next regular poll, backing off
//! exponentially, or stopping the relay altogether.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchErrorPolicy {
    /// Log the error and poll again after the regular interval
    #[default]
    Continue,
    /// Log the error and poll again after an exponential backoff
    Restart,
    /// Stop the relay and surface the error
    Exit,
}

impl std::fmt::Display for FetchErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchErrorPolicy::Continue => write!(f, "continue"),
            FetchErrorPolicy::Restart => write!(f, "restart"),
            FetchErrorPolicy::Exit => write!(f, "exit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Wait this long, then start a new cycle
    Sleep(Duration),
    /// Stop the relay
    Stop,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: FetchErrorPolicy,
    poll_interval: Duration,
    restart_backoff: Duration,
    max_backoff: Duration,
    consecutive_failures: u32,
}

impl Supervisor {
    pub fn new(
        policy: FetchErrorPolicy,
        poll_interval: Duration,
        restart_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            policy,
            poll_interval,
            restart_backoff,
            max_backoff,
            consecutive_failures: 0,
        }
    }

    pub fn from_config(relay: &RelayConfig) -> Self {
        Self::new(
            relay.on_error,
            Duration::from_secs(relay.poll_interval),
            Duration::from_secs(relay.restart_backoff),
            Duration::from_secs(relay.max_backoff),
        )
    }

    pub fn policy(&self) -> FetchErrorPolicy {
        self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A cycle completed; returns the wait before the next one
    pub fn on_success(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.poll_interval
    }

    /// A cycle was aborted
    pub fn on_error(&mut self) -> Verdict {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.policy {
            FetchErrorPolicy::Continue => Verdict::Sleep(self.poll_interval),
            FetchErrorPolicy::Restart => Verdict::Sleep(self.current_backoff()),
            FetchErrorPolicy::Exit => Verdict::Stop,
        }
    }

    /// Backoff for the current failure streak: doubles per failure, capped
    fn current_backoff(&self) -> Duration {
        let exponent = self.consecutive_failures.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        self.restart_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
