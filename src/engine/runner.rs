//! The single task that drives a [`FeedEngine`].
//!
//! Uses `tokio::select!` to multiplex four sources:
//! - **Commands** from the UI, via [`EngineHandle`]
//! - **Completions** of background remote calls
//! - **Debounce deadline** of pending search input
//! - **Poll timer** for background refresh
//!
//! After every step the current [`EngineSnapshot`] is published on a `watch` channel and
//! queued [`Notice`]s are forwarded.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::feed::{FeedMode, FilterState, TimeRange};
use crate::remote::WatchlistEntry;

use super::{EngineError, EngineEvent, EngineSnapshot, FeedEngine, Notice};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Operations the UI can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetMode(FeedMode),
    SetTimeRange(TimeRange),
    SetSearchText(String),
    SetCategories(BTreeSet<String>),
    GoToPage(u32),
    NextPage,
    PreviousPage,
    AddWatchlist(WatchlistEntry),
    RemoveWatchlist(String),
    RefreshNow,
    SetIdentity(Option<String>),
    RecordView(String),
    SearchTickers(String),
    Shutdown,
}

/// UI side of a running engine.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    notices: mpsc::UnboundedReceiver<Notice>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub async fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Closed)
    }

    /// A receiver that always sees the latest snapshot.
    pub fn snapshots(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn next_notice(&mut self) -> Option<Notice> {
        self.notices.recv().await
    }

    /// Stop the runner and wait for it to exit.
    pub async fn shutdown(self) {
        // Already stopped if the send fails
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Feed engine task failed");
        }
    }
}

/// Start `engine` on its own task.
///
/// `identity` and `initial` are applied before the first fetch (see [`FeedEngine::start`]).
pub fn spawn(
    mut engine: FeedEngine,
    events: mpsc::Receiver<EngineEvent>,
    identity: Option<String>,
    initial: FilterState,
) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        engine.start(identity.as_deref(), initial).await;
        publish(&mut engine, &snapshot_tx, &notice_tx);
        run(engine, events, command_rx, snapshot_tx, notice_tx).await;
    });

    EngineHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        notices: notice_rx,
        task,
    }
}

async fn run(
    mut engine: FeedEngine,
    mut events: mpsc::Receiver<EngineEvent>,
    mut commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<EngineSnapshot>,
    notices: mpsc::UnboundedSender<Notice>,
) {
    loop {
        let debounce_deadline = engine.debouncer.deadline();

        tokio::select! {
            biased;  // Process in order listed for predictable behavior

            command = commands.recv() => {
                match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => apply(&mut engine, command).await,
                }
            }

            Some(event) = events.recv() => {
                engine.handle_event(event).await;
            }

            _ = sleep_until(debounce_deadline.unwrap_or_else(Instant::now)), if debounce_deadline.is_some() => {
                engine.settle_search(Instant::now());
            }

            _ = engine.poller.tick() => {
                engine.on_poll_tick();
            }
        }

        publish(&mut engine, &snapshots, &notices);
    }

    engine.dispose();
    tracing::info!("Feed engine stopped");
}

async fn apply(engine: &mut FeedEngine, command: Command) {
    match command {
        Command::SetMode(mode) => engine.set_mode(mode),
        Command::SetTimeRange(range) => engine.set_time_range(range),
        Command::SetSearchText(text) => engine.set_search_text(text),
        Command::SetCategories(categories) => engine.set_categories(categories).await,
        Command::GoToPage(page) => {
            engine.go_to_page(page);
        }
        Command::NextPage => {
            engine.next_page();
        }
        Command::PreviousPage => {
            engine.previous_page();
        }
        Command::AddWatchlist(entry) => {
            let symbol = entry.symbol.clone();
            if let Err(e) = engine.add_watchlist(entry) {
                reject(engine, symbol, e);
            }
        }
        Command::RemoveWatchlist(symbol) => {
            if let Err(e) = engine.remove_watchlist(&symbol) {
                reject(engine, symbol, e);
            }
        }
        Command::RefreshNow => engine.refresh_now(),
        Command::SetIdentity(identity) => engine.set_identity(identity.as_deref()).await,
        Command::RecordView(link) => engine.record_view(&link),
        Command::SearchTickers(query) => engine.search_tickers(&query),
        // Handled by the loop
        Command::Shutdown => {}
    }
}

fn reject(engine: &mut FeedEngine, symbol: String, error: EngineError) {
    tracing::debug!(symbol = %symbol, error = %error, "Watchlist change refused");
    engine.notices.push(Notice::WatchlistRejected {
        symbol,
        reason: error.to_string(),
    });
}

fn publish(
    engine: &mut FeedEngine,
    snapshots: &watch::Sender<EngineSnapshot>,
    notices: &mpsc::UnboundedSender<Notice>,
) {
    let next = engine.snapshot();
    snapshots.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });

    for notice in engine.take_notices() {
        // Nobody listening is fine
        let _ = notices.send(notice);
    }
}
