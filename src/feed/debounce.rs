//! Quiescence timer for free-text search.
//!
//! Each `submit` replaces the pending text and pushes the deadline out by the full
//! quiet period, so a burst of keystrokes settles exactly once, with the last text.
//! The runner sleeps until [`SearchDebouncer::deadline`] and then calls
//! [`SearchDebouncer::take_settled`].

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct PendingInput {
    text: String,
    deadline: Instant,
}

#[derive(Debug)]
pub struct SearchDebouncer {
    quiet: Duration,
    pending: Option<PendingInput>,
    disposed: bool,
}

impl SearchDebouncer {
    pub const DEFAULT_QUIET: Duration = Duration::from_millis(500);

    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            disposed: false,
        }
    }

    /// Record `text` as the latest input and restart the quiet period.
    pub fn submit(&mut self, text: impl Into<String>) {
        self.submit_at(text.into(), Instant::now());
    }

    fn submit_at(&mut self, text: String, now: Instant) {
        if self.disposed {
            tracing::debug!("Ignoring search input after disposal");
            return;
        }
        self.pending = Some(PendingInput {
            text,
            deadline: now + self.quiet,
        });
    }

    /// When the pending input settles, if there is one.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    pub fn pending_text(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.text.as_str())
    }

    /// Take the settled text if the quiet period has elapsed by `now`.
    pub fn take_settled(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some(p) if p.deadline <= now => self.pending.take().map(|p| p.text),
            _ => None,
        }
    }

    /// Drop pending input without settling.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Cancel and refuse all further input. Nothing settles after this.
    pub fn dispose(&mut self) {
        self.cancel();
        self.disposed = true;
    }
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_QUIET)
    }
}
