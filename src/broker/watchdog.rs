//! Idle watchdog
//!
//! Checks the shared [`Activity`] on a fixed interval and cancels the
//! broker's shutdown token once nothing has been in flight for the idle
//! threshold. The transition is terminal: after firing, the loop exits and
//! never re-arms.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::activity::Activity;

/// Why the watchdog loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    /// The idle threshold was reached and shutdown was initiated.
    Idle,
    /// Shutdown was initiated by someone else first.
    Cancelled,
}

#[derive(Debug)]
pub struct IdleWatchdog {
    activity: Arc<Activity>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleWatchdog {
    pub fn new(activity: Arc<Activity>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            activity,
            idle_timeout,
            interval,
        }
    }

    /// `true` when no call is in flight and the broker has been quiet long enough.
    pub fn is_idle(&self) -> bool {
        self.activity.active_connections() == 0 && self.activity.idle_for() >= self.idle_timeout
    }

    pub async fn run(self, shutdown: CancellationToken) -> WatchdogExit {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return WatchdogExit::Cancelled,
                _ = ticker.tick() => {}
            }

            if self.is_idle() {
                info!(
                    idle_secs = self.activity.idle_for().as_secs(),
                    "no activity within idle threshold, shutting down"
                );
                shutdown.cancel();
                return WatchdogExit::Idle;
            }

            debug!(
                connections = self.activity.active_connections(),
                idle_ms = self.activity.idle_for().as_millis() as u64,
                "watchdog tick"
            );
        }
    }
}
