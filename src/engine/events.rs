//! Background completion handling.
//!
//! Each remote call the engine makes comes back here as an [`EngineEvent`]. Generation
//! checks happen first; a stale event changes nothing.

use crate::feed::Generation;
use crate::remote::{MarketSnapshot, NewsPage, RemoteError, TickerMatch, WatchlistEntry};
use crate::watchlist::MutationOutcome;

use super::{FeedEngine, Notice};

/// Completion of a background remote call.
#[derive(Debug)]
pub enum EngineEvent {
    /// A news page arrived.
    ///
    /// Fields:
    /// - `generation`: Feed generation the request was issued under
    /// - `page`: The page that was requested
    /// - `result`: The page or the transport/server error
    FeedLoaded {
        generation: Generation,
        page: u32,
        result: Result<NewsPage, RemoteError>,
    },
    MarketLoaded {
        generation: Generation,
        result: Result<MarketSnapshot, RemoteError>,
    },
    /// Full watchlist for `identity`, used to replace the replica.
    WatchlistLoaded {
        generation: Generation,
        identity: String,
        result: Result<Vec<WatchlistEntry>, RemoteError>,
    },
    WatchlistAdded {
        identity: String,
        entry: WatchlistEntry,
        result: Result<(), RemoteError>,
    },
    WatchlistRemoved {
        identity: String,
        symbol: String,
        result: Result<(), RemoteError>,
    },
    TickersFound {
        generation: Generation,
        query: String,
        result: Result<Vec<TickerMatch>, RemoteError>,
    },
    /// Best-effort view count. `Ok(None)` means the server did not report a count.
    ViewRecorded {
        link: String,
        result: Result<Option<u64>, RemoteError>,
    },
}

impl FeedEngine {
    /// Apply a background completion.
    pub async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::FeedLoaded {
                generation,
                page,
                result,
            } => self.handle_feed_loaded(generation, page, result),
            EngineEvent::MarketLoaded { generation, result } => {
                if !self.market_seq.admit(generation) {
                    return;
                }
                match result {
                    Ok(snapshot) => {
                        self.market = Some(snapshot);
                        self.market_error = None;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Market refresh failed, keeping last snapshot");
                        self.market_error = Some(e.detail());
                    }
                }
            }
            EngineEvent::WatchlistLoaded {
                generation,
                identity,
                result,
            } => {
                if !self.watchlist_seq.admit(generation) || !self.is_current_identity(&identity) {
                    return;
                }
                match result {
                    Ok(entries) => {
                        tracing::debug!(count = entries.len(), "Watchlist refreshed");
                        self.watchlist.replace_all(entries);
                        self.persist_watchlist().await;
                        self.sync_watchlist_symbols();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Watchlist refresh failed, keeping cached replica");
                    }
                }
            }
            EngineEvent::WatchlistAdded {
                identity,
                entry,
                result,
            } => {
                if !self.is_current_identity(&identity) {
                    tracing::debug!(
                        symbol = %entry.symbol,
                        "Ignoring add completion for previous identity"
                    );
                    return;
                }
                let outcome = self
                    .watchlist
                    .complete_add(&entry, result.map_err(|e| e.detail()));
                self.settle_watchlist(entry.symbol, outcome).await;
            }
            EngineEvent::WatchlistRemoved {
                identity,
                symbol,
                result,
            } => {
                if !self.is_current_identity(&identity) {
                    tracing::debug!(symbol = %symbol, "Ignoring remove completion for previous identity");
                    return;
                }
                let outcome = self
                    .watchlist
                    .complete_remove(&symbol, result.map_err(|e| e.detail()));
                self.settle_watchlist(symbol, outcome).await;
            }
            EngineEvent::TickersFound {
                generation,
                query,
                result,
            } => match result {
                Ok(matches) => {
                    // A late answer is still a correct answer for its own query
                    self.ticker_cache.put(query, matches.clone());
                    if self.ticker_seq.admit(generation) {
                        self.ticker_matches = matches;
                    }
                }
                Err(e) => {
                    if self.ticker_seq.admit(generation) {
                        tracing::warn!(query = %query, error = %e, "Ticker search failed");
                        self.ticker_matches.clear();
                    }
                }
            },
            EngineEvent::ViewRecorded { link, result } => match result {
                Ok(Some(server)) => {
                    let floor = self
                        .view_floor
                        .get(&link)
                        .copied()
                        .unwrap_or(0)
                        .max(server);
                    self.view_floor.put(link.clone(), floor);
                    if let Some(article) = self.items.iter_mut().find(|a| a.link == link) {
                        article.view_count = article.view_count.max(floor);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(link = %link, error = %e, "View not recorded");
                }
            },
        }
    }

    fn handle_feed_loaded(
        &mut self,
        generation: Generation,
        page: u32,
        result: Result<NewsPage, RemoteError>,
    ) {
        if !self.feed_seq.admit(generation) {
            return;
        }
        self.loading = false;

        match result {
            Ok(NewsPage { mut items, pages }) => {
                self.apply_view_floor(&mut items);
                self.cursor.apply(page, pages);
                tracing::debug!(
                    generation,
                    page = self.cursor.page(),
                    total_pages = self.cursor.total_pages(),
                    count = items.len(),
                    "Feed page applied"
                );
                self.items = items;
                self.feed_error = None;
            }
            Err(e) => {
                tracing::warn!(generation, page, error = %e, "Feed request failed, keeping last page");
                let detail = e.detail();
                self.feed_error = Some(detail.clone());
                self.notices.push(Notice::FeedFailed { detail });
            }
        }
    }

    async fn settle_watchlist(&mut self, symbol: String, outcome: MutationOutcome) {
        match outcome {
            MutationOutcome::Applied => {
                tracing::info!(symbol = %symbol, "Watchlist change confirmed");
                self.notices.push(Notice::WatchlistApplied { symbol });
            }
            MutationOutcome::RolledBack { detail } => {
                tracing::warn!(symbol = %symbol, detail = %detail, "Watchlist change rolled back");
                self.notices
                    .push(Notice::WatchlistRolledBack { symbol, detail });
            }
            MutationOutcome::Pending => {}
        }
        self.persist_watchlist().await;
        self.sync_watchlist_symbols();
    }

    fn is_current_identity(&self, identity: &str) -> bool {
        self.auth.identity() == Some(identity)
    }
}
