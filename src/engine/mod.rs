//! The feed synchronization engine.
//!
//! [`FeedEngine`] owns the filter, the visible page, the pagination cursor, the market
//! snapshot and the watchlist replica. Operations change that state synchronously and
//! hand remote calls to background tasks; each task reports back with an [`EngineEvent`]
//! which [`FeedEngine::handle_event`] applies only if its generation is still current.
//!
//! A single task drives the engine (see [`spawn`]), so no state is shared or locked.

mod events;
mod runner;

pub use events::EngineEvent;
pub use runner::{spawn, Command, EngineHandle};

use std::collections::BTreeSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::feed::{
    compose, AuthContext, FeedMode, FeedQuery, FilterState, PageSlot, PaginationCursor,
    PollingScheduler, RequestSequencer, SearchDebouncer, Stamped, TimeRange,
};
use crate::preferences::Preferences;
use crate::remote::{Article, FeedService, MarketSnapshot, TickerMatch, WatchlistEntry};
use crate::watchlist::{normalize_symbol, Begin, MutationOutcome, WatchlistSync};

/// Background completions queued ahead of the runner.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Links whose displayed view count is remembered across page loads.
const VIEW_FLOOR_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Settled search text beyond this many characters is cut off.
const MAX_SEARCH_LENGTH: usize = 256;

// ============================================================================
// Errors & Notices
// ============================================================================

/// Requests the engine refuses before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Watchlist changes need a signed-in identity
    #[error("Sign in to manage the watchlist")]
    NotAuthenticated,

    #[error("Ticker symbol is empty")]
    EmptySymbol,

    /// The runner task has exited
    #[error("Feed engine has shut down")]
    Closed,
}

/// Things the UI should tell the user about, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The current feed request failed. The previous page stays visible.
    FeedFailed { detail: String },
    WatchlistApplied { symbol: String },
    /// The remote store refused a watchlist change and the replica was restored.
    WatchlistRolledBack { symbol: String, detail: String },
    /// A watchlist change was refused locally and never sent.
    WatchlistRejected { symbol: String, reason: String },
}

// ============================================================================
// Settings & Snapshots
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub page_size: u32,
    pub poll_interval: Duration,
    pub search_debounce: Duration,
    pub ticker_cache_size: NonZeroUsize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: 24,
            poll_interval: PollingScheduler::DEFAULT_PERIOD,
            search_debounce: SearchDebouncer::DEFAULT_QUIET,
            ticker_cache_size: NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// The visible page. Replaced wholesale, never patched from outside.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub items: Vec<Article>,
    pub page: u32,
    pub total_pages: u32,
}

/// Read-only view of the engine, published after every step.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub identity: Option<String>,
    pub filter: FilterState,
    /// Live search input, possibly not settled yet.
    pub search_input: String,
    pub feed: FeedPage,
    pub page_window: Vec<PageSlot>,
    pub loading: bool,
    pub feed_error: Option<String>,
    pub market: Option<MarketSnapshot>,
    pub market_error: Option<String>,
    pub watchlist: Vec<WatchlistEntry>,
    pub ticker_matches: Vec<TickerMatch>,
}

// ============================================================================
// FeedEngine
// ============================================================================

pub struct FeedEngine {
    service: Arc<dyn FeedService>,
    prefs: Preferences,
    event_tx: mpsc::Sender<EngineEvent>,
    settings: EngineSettings,

    auth: AuthContext,
    filter: FilterState,
    search_input: String,

    // Feed view
    items: Vec<Article>,
    cursor: PaginationCursor,
    loading: bool,
    feed_error: Option<String>,
    /// Highest view count shown per link; later pages never display less.
    view_floor: LruCache<String, u64>,

    // One generation counter per concern
    feed_seq: RequestSequencer,
    market_seq: RequestSequencer,
    watchlist_seq: RequestSequencer,
    ticker_seq: RequestSequencer,

    market: Option<MarketSnapshot>,
    market_error: Option<String>,

    watchlist: WatchlistSync,

    ticker_matches: Vec<TickerMatch>,
    ticker_cache: LruCache<String, Vec<TickerMatch>>,

    pub(crate) debouncer: SearchDebouncer,
    pub(crate) poller: PollingScheduler,

    notices: Vec<Notice>,
}

impl FeedEngine {
    /// Create an engine and the receiver its background completions arrive on.
    ///
    /// Must be called inside a Tokio runtime (the poll timer is created here).
    pub fn new(
        service: Arc<dyn FeedService>,
        prefs: Preferences,
        settings: EngineSettings,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = Self {
            service,
            prefs,
            event_tx,
            auth: AuthContext::anonymous(),
            filter: FilterState::default(),
            search_input: String::new(),
            items: Vec::new(),
            cursor: PaginationCursor::default(),
            loading: false,
            feed_error: None,
            view_floor: LruCache::new(VIEW_FLOOR_CAPACITY),
            feed_seq: RequestSequencer::new("feed"),
            market_seq: RequestSequencer::new("market"),
            watchlist_seq: RequestSequencer::new("watchlist"),
            ticker_seq: RequestSequencer::new("ticker_search"),
            market: None,
            market_error: None,
            watchlist: WatchlistSync::new(),
            ticker_matches: Vec::new(),
            ticker_cache: LruCache::new(settings.ticker_cache_size),
            debouncer: SearchDebouncer::new(settings.search_debounce),
            poller: PollingScheduler::new(settings.poll_interval),
            notices: Vec::new(),
            settings,
        };
        (engine, event_rx)
    }

    /// Apply the starting identity and filter, then issue the initial fetches.
    ///
    /// Categories and watchlist symbols in `initial` are ignored; they come from the
    /// identity's stored preferences.
    pub async fn start(&mut self, identity: Option<&str>, initial: FilterState) {
        self.filter = FilterState {
            categories: BTreeSet::new(),
            watchlist_symbols: Vec::new(),
            ..initial
        };
        self.search_input = self.filter.search_text.clone();

        let auth = AuthContext::from_identity(identity);
        if auth.is_authenticated() {
            self.switch_identity(auth).await;
        }

        self.dispatch_feed(1);
        self.refresh_market();
        self.poller.restart();
    }

    // ========================================================================
    // Filter operations
    // ========================================================================

    pub fn set_mode(&mut self, mode: FeedMode) {
        self.apply_filter(self.filter.with_mode(mode));
    }

    pub fn set_time_range(&mut self, time_range: TimeRange) {
        self.apply_filter(self.filter.with_time_range(time_range));
    }

    /// Record live search input. The filter changes only once the input settles.
    pub fn set_search_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.search_input.clone_from(&text);
        self.debouncer.submit(text);
    }

    /// Settle pending search input if its quiet period has elapsed by `now`.
    pub fn settle_search(&mut self, now: Instant) -> bool {
        match self.debouncer.take_settled(now) {
            Some(text) => {
                self.on_search_settled(text);
                true
            }
            None => false,
        }
    }

    /// Commit settled search text and fetch page 1 for it.
    pub fn on_search_settled(&mut self, text: String) {
        let text: String = text.chars().take(MAX_SEARCH_LENGTH).collect();
        if text == self.filter.search_text {
            return;
        }
        tracing::debug!(query = %text, "Search settled");
        self.filter = self.filter.with_search_text(text);
        self.dispatch_feed(1);
    }

    /// Persist the identity's category selection, then apply it.
    pub async fn set_categories(&mut self, categories: BTreeSet<String>) {
        let categories: BTreeSet<String> = categories
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        if let Some(identity) = self.auth.identity() {
            if let Err(e) = self.prefs.save_categories(Some(identity), &categories).await {
                tracing::warn!(error = %e, "Failed to persist category preferences");
            }
        }
        self.apply_filter(self.filter.with_categories(categories));
    }

    /// Swap in a new filter snapshot; axis changes fetch page 1 and restart polling.
    fn apply_filter(&mut self, next: FilterState) {
        let refetch = next.requires_refetch_from(&self.filter);
        self.filter = next;
        if refetch {
            self.dispatch_feed(1);
            self.poller.restart();
        }
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Fetch page `n`. Returns `false` (and does nothing) when `n` is out of range.
    ///
    /// The cursor moves only when the response arrives.
    pub fn go_to_page(&mut self, n: u32) -> bool {
        if !self.cursor.accepts(n) {
            tracing::debug!(page = n, total = self.cursor.total_pages(), "Page out of range");
            return false;
        }
        self.dispatch_feed(n);
        true
    }

    pub fn next_page(&mut self) -> bool {
        self.go_to_page(self.cursor.page().saturating_add(1))
    }

    pub fn previous_page(&mut self) -> bool {
        self.go_to_page(self.cursor.page().saturating_sub(1))
    }

    // ========================================================================
    // Refresh
    // ========================================================================

    /// Re-fetch the current page and the market snapshot. The poll phase is kept.
    pub fn refresh_now(&mut self) {
        self.dispatch_feed(self.cursor.page());
        self.refresh_market();
    }

    pub fn on_poll_tick(&mut self) {
        let search_active =
            !self.filter.search_text.trim().is_empty() || !self.search_input.trim().is_empty();
        let plan = PollingScheduler::plan(&self.cursor, search_active);
        tracing::trace!(
            refresh_feed = plan.refresh_feed,
            refresh_market = plan.refresh_market,
            "Poll tick"
        );

        if plan.refresh_feed {
            self.dispatch_feed(1);
        }
        if plan.refresh_market {
            self.refresh_market();
        }
    }

    fn dispatch_feed(&mut self, page: u32) {
        match compose(&self.filter, &self.auth, page, self.settings.page_size) {
            FeedQuery::Empty => {
                // Still consumes a generation so older in-flight pages are discarded
                let generation = self.feed_seq.advance();
                tracing::debug!(generation, "No watchlist symbols, showing empty feed");
                self.items.clear();
                self.cursor.apply(1, 1);
                self.loading = false;
                self.feed_error = None;
            }
            FeedQuery::Fetch(query) => {
                let Stamped {
                    generation,
                    request,
                } = self.feed_seq.issue(query);
                tracing::debug!(generation, page = request.page, "Dispatching feed request");
                self.loading = true;

                let service = Arc::clone(&self.service);
                self.spawn_event(async move {
                    let result = service.list_news(&request).await;
                    EngineEvent::FeedLoaded {
                        generation,
                        page: request.page,
                        result,
                    }
                });
            }
        }
    }

    fn refresh_market(&mut self) {
        let generation = self.market_seq.advance();
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            EngineEvent::MarketLoaded {
                generation,
                result: service.market_snapshot().await,
            }
        });
    }

    // ========================================================================
    // Identity & Watchlist
    // ========================================================================

    /// Sign in as `identity`, or sign out with `None`.
    ///
    /// The cached replica and categories for the new identity apply immediately; a
    /// remote watchlist refresh then replaces the replica.
    pub async fn set_identity(&mut self, identity: Option<&str>) {
        let auth = AuthContext::from_identity(identity);
        if auth == self.auth {
            return;
        }
        self.switch_identity(auth).await;
        self.dispatch_feed(1);
        self.poller.restart();
    }

    async fn switch_identity(&mut self, auth: AuthContext) {
        tracing::info!(
            identity = auth.identity().unwrap_or("<signed out>"),
            "Identity changed"
        );
        self.auth = auth;
        // A refresh still in flight belongs to the previous identity
        self.watchlist_seq.advance();

        let (categories, cached) = match self.auth.identity() {
            Some(identity) => {
                let categories = self
                    .prefs
                    .categories(Some(identity))
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "Ignoring stored categories");
                        BTreeSet::new()
                    });
                let cached = self.prefs.watchlist(identity).await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "Ignoring cached watchlist");
                    Vec::new()
                });
                (categories, cached)
            }
            None => (BTreeSet::new(), Vec::new()),
        };

        self.watchlist.replace_all(cached);
        self.filter = self
            .filter
            .with_categories(categories)
            .with_watchlist_symbols(self.watchlist.symbols());

        if let Some(identity) = self.auth.identity().map(str::to_string) {
            self.refresh_watchlist(identity);
        }
    }

    fn refresh_watchlist(&mut self, identity: String) {
        let Stamped {
            generation,
            request: identity,
        } = self.watchlist_seq.issue(identity);
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.list_watchlist(&identity).await;
            EngineEvent::WatchlistLoaded {
                generation,
                identity,
                result,
            }
        });
    }

    /// Optimistically add `entry`; the final outcome arrives as a [`Notice`].
    pub fn add_watchlist(&mut self, entry: WatchlistEntry) -> Result<MutationOutcome, EngineError> {
        let identity = self
            .auth
            .identity()
            .ok_or(EngineError::NotAuthenticated)?
            .to_string();
        let symbol = normalize_symbol(&entry.symbol);
        if symbol.is_empty() {
            return Err(EngineError::EmptySymbol);
        }
        let entry = WatchlistEntry::new(symbol, entry.display_name);

        match self.watchlist.begin_add(entry.clone()) {
            Begin::Settled(outcome) => {
                tracing::debug!(symbol = %entry.symbol, ?outcome, "Watchlist add not sent");
                Ok(outcome)
            }
            Begin::Dispatch => {
                tracing::info!(symbol = %entry.symbol, "Adding to watchlist");
                let service = Arc::clone(&self.service);
                self.spawn_event(async move {
                    let result = service.add_watchlist(&identity, &entry).await;
                    EngineEvent::WatchlistAdded {
                        identity,
                        entry,
                        result,
                    }
                });
                self.sync_watchlist_symbols();
                Ok(MutationOutcome::Pending)
            }
        }
    }

    /// Optimistically remove `symbol`; the final outcome arrives as a [`Notice`].
    pub fn remove_watchlist(&mut self, symbol: &str) -> Result<MutationOutcome, EngineError> {
        let identity = self
            .auth
            .identity()
            .ok_or(EngineError::NotAuthenticated)?
            .to_string();
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(EngineError::EmptySymbol);
        }

        match self.watchlist.begin_remove(&symbol) {
            Begin::Settled(outcome) => {
                tracing::debug!(symbol = %symbol, ?outcome, "Watchlist remove not sent");
                Ok(outcome)
            }
            Begin::Dispatch => {
                tracing::info!(symbol = %symbol, "Removing from watchlist");
                let service = Arc::clone(&self.service);
                self.spawn_event(async move {
                    let result = service.remove_watchlist(&identity, &symbol).await;
                    EngineEvent::WatchlistRemoved {
                        identity,
                        symbol,
                        result,
                    }
                });
                self.sync_watchlist_symbols();
                Ok(MutationOutcome::Pending)
            }
        }
    }

    /// Feed the replica's symbols into the filter.
    fn sync_watchlist_symbols(&mut self) {
        let symbols = self.watchlist.symbols();
        if symbols != self.filter.watchlist_symbols {
            self.apply_filter(self.filter.with_watchlist_symbols(symbols));
        }
    }

    async fn persist_watchlist(&self) {
        let Some(identity) = self.auth.identity() else {
            return;
        };
        if let Err(e) = self
            .prefs
            .save_watchlist(identity, &self.watchlist.confirmed())
            .await
        {
            tracing::warn!(error = %e, "Failed to cache watchlist");
        }
    }

    // ========================================================================
    // Ticker search & views
    // ========================================================================

    /// Look up tickers matching `query`. Blank queries clear the results.
    pub fn search_tickers(&mut self, query: &str) {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            self.ticker_seq.advance();
            self.ticker_matches.clear();
            return;
        }
        if let Some(hit) = self.ticker_cache.get(&normalized) {
            // Supersede any slower lookup for an older query
            self.ticker_seq.advance();
            self.ticker_matches = hit.clone();
            return;
        }

        let Stamped {
            generation,
            request: query,
        } = self.ticker_seq.issue(normalized);
        let service = Arc::clone(&self.service);
        self.spawn_event(async move {
            let result = service.search_tickers(&query).await;
            EngineEvent::TickersFound {
                generation,
                query,
                result,
            }
        });
    }

    /// Count a view of `link`: bump the shown count now, tell the server in the background.
    pub fn record_view(&mut self, link: &str) {
        let floor = self.view_floor.get(link).copied();
        match self.items.iter_mut().find(|a| a.link == link) {
            Some(article) => {
                let next = article.view_count.max(floor.unwrap_or(0)).saturating_add(1);
                article.view_count = next;
                self.view_floor.put(link.to_string(), next);
            }
            None => {
                if let Some(floor) = floor {
                    self.view_floor
                        .put(link.to_string(), floor.saturating_add(1));
                }
            }
        }

        let service = Arc::clone(&self.service);
        let link = link.to_string();
        self.spawn_event(async move {
            let result = service.record_view(&link).await;
            EngineEvent::ViewRecorded { link, result }
        });
    }

    /// Never let a freshly loaded page show fewer views than already displayed.
    fn apply_view_floor(&self, items: &mut [Article]) {
        for article in items {
            if let Some(&floor) = self.view_floor.peek(&article.link) {
                article.view_count = article.view_count.max(floor);
            }
        }
    }

    // ========================================================================
    // Lifecycle & Views
    // ========================================================================

    /// Cancel pending search input; nothing settles after this.
    pub fn dispose(&mut self) {
        self.debouncer.dispose();
        tracing::debug!("Feed engine disposed");
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            identity: self.auth.identity().map(str::to_string),
            filter: self.filter.clone(),
            search_input: self.search_input.clone(),
            feed: FeedPage {
                items: self.items.clone(),
                page: self.cursor.page(),
                total_pages: self.cursor.total_pages(),
            },
            page_window: self.cursor.window(),
            loading: self.loading,
            feed_error: self.feed_error.clone(),
            market: self.market.clone(),
            market_error: self.market_error.clone(),
            watchlist: self.watchlist.entries(),
            ticker_matches: self.ticker_matches.clone(),
        }
    }

    /// Run `task` in the background and deliver its event to the runner.
    fn spawn_event<F>(&self, task: F)
    where
        F: Future<Output = EngineEvent> + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let event = task.await;
            if tx.send(event).await.is_err() {
                tracing::debug!("Engine stopped, dropping completion");
            }
        });
    }
}
