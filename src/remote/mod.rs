//! Remote collaborators: the news feed, market data, watchlist store and ticker search.
//!
//! The engine talks to them only through the [`FeedService`] trait. [`HttpFeedService`]
//! is the production implementation; tests substitute scripted doubles.
//!
//! Retry and timeout policy belongs to this layer, never to the engine.

mod client;
mod types;

use async_trait::async_trait;

pub use client::{ClientSettings, HttpFeedService, RemoteError};
pub use types::{
    Article, MarketSnapshot, NewsPage, Quote, Sentiment, TickerMatch, WatchlistEntry,
};

use crate::feed::NewsQuery;

/// Operations the feed engine depends on.
#[async_trait]
pub trait FeedService: Send + Sync {
    async fn list_news(&self, query: &NewsQuery) -> Result<NewsPage, RemoteError>;

    async fn market_snapshot(&self) -> Result<MarketSnapshot, RemoteError>;

    async fn list_watchlist(&self, identity: &str) -> Result<Vec<WatchlistEntry>, RemoteError>;

    async fn add_watchlist(
        &self,
        identity: &str,
        entry: &WatchlistEntry,
    ) -> Result<(), RemoteError>;

    async fn remove_watchlist(&self, identity: &str, symbol: &str) -> Result<(), RemoteError>;

    async fn search_tickers(&self, query: &str) -> Result<Vec<TickerMatch>, RemoteError>;

    /// Best-effort view counter bump. Returns the server's new count when it reports one.
    async fn record_view(&self, link: &str) -> Result<Option<u64>, RemoteError>;
}
