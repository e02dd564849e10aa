//! Background refresh timer.
//!
//! One repeating tick drives two refreshes: the market ticker, always, and the page-1
//! feed, only while the reader sits on page 1 with no search. A background refresh must
//! never pull the reader off a search result or a page they navigated to.
//!
//! Filter changes call [`PollingScheduler::restart`] so the next tick is a full period
//! after the immediate fetch that accompanies the change.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use super::pagination::PaginationCursor;

/// What a tick should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    pub refresh_feed: bool,
    pub refresh_market: bool,
}

#[derive(Debug)]
pub struct PollingScheduler {
    period: Duration,
    interval: Interval,
}

impl PollingScheduler {
    pub const DEFAULT_PERIOD: Duration = Duration::from_secs(30);

    /// Must be called inside a Tokio runtime. The first tick is one full period out.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { period, interval }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Reset the tick phase: the next tick fires one full period from now.
    pub fn restart(&mut self) {
        self.interval.reset();
        tracing::trace!(period_ms = self.period.as_millis() as u64, "Poll timer restarted");
    }

    pub fn plan(cursor: &PaginationCursor, search_active: bool) -> TickPlan {
        TickPlan {
            refresh_feed: cursor.is_first_page() && !search_active,
            refresh_market: true,
        }
    }
}
