//! Wire types exchanged with the news/market/watchlist service.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Articles
// ============================================================================

/// Headline sentiment as labelled by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    #[default]
    Unset,
}

impl From<Option<String>> for Sentiment {
    fn from(label: Option<String>) -> Self {
        match label.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("positive") => Sentiment::Positive,
            Some("negative") => Sentiment::Negative,
            Some("neutral") => Sentiment::Neutral,
            _ => Sentiment::Unset,
        }
    }
}

impl From<Sentiment> for Option<String> {
    fn from(sentiment: Sentiment) -> Self {
        match sentiment {
            Sentiment::Positive => Some("positive".to_string()),
            Sentiment::Negative => Some("negative".to_string()),
            Sentiment::Neutral => Some("neutral".to_string()),
            Sentiment::Unset => None,
        }
    }
}

/// A news item. `link` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub link: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, rename = "views", deserialize_with = "null_as_zero")]
    pub view_count: u64,
    #[serde(default, rename = "source")]
    pub source_link: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Display format the scraper writes timestamps in, e.g. `05 Mar 2025, 02:30 PM`.
const SCRAPER_TIMESTAMP_FORMAT: &str = "%d %b %Y, %I:%M %p";

impl Article {
    /// Publication time, if the timestamp is in a recognized format.
    ///
    /// Scraper timestamps carry no zone and are treated as UTC.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        let raw = self.timestamp.as_deref()?.trim();
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, SCRAPER_TIMESTAMP_FORMAT) {
            return Some(naive.and_utc());
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// One page of the news listing as returned by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsPage {
    pub items: Vec<Article>,
    /// Page count reported by the server. May be 0 when nothing matched.
    pub pages: u32,
}

/// Older deployments answer with a bare array instead of the paged envelope.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum NewsResponse {
    Paged {
        items: Vec<Article>,
        #[serde(default = "one")]
        pages: u32,
    },
    Bare(Vec<Article>),
}

fn one() -> u32 {
    1
}

impl From<NewsResponse> for NewsPage {
    fn from(response: NewsResponse) -> Self {
        match response {
            NewsResponse::Paged { items, pages } => NewsPage { items, pages },
            NewsResponse::Bare(items) => NewsPage { items, pages: 1 },
        }
    }
}

// ============================================================================
// Market
// ============================================================================

/// Latest price and intraday sparkline for an index or commodity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub percent_change: f64,
    #[serde(default)]
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default)]
    pub indices: BTreeMap<String, Quote>,
    #[serde(default)]
    pub commodities: BTreeMap<String, Quote>,
}

// ============================================================================
// Watchlist & tickers
// ============================================================================

/// A tracked ticker. `symbol` is unique per identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    #[serde(rename = "name", default)]
    pub display_name: String,
}

impl WatchlistEntry {
    pub fn new(symbol: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            display_name: display_name.into(),
        }
    }
}

/// Result row of a ticker search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerMatch {
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

impl From<TickerMatch> for WatchlistEntry {
    fn from(m: TickerMatch) -> Self {
        WatchlistEntry::new(m.symbol, m.name)
    }
}

/// Body of `POST /watchlist`.
#[derive(Debug, Serialize)]
pub(crate) struct AddWatchlistRequest<'a> {
    pub email: &'a str,
    pub symbol: &'a str,
    pub name: &'a str,
}

/// Body of `POST /news/view`.
#[derive(Debug, Serialize)]
pub(crate) struct ViewRequest<'a> {
    pub link: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ViewResponse {
    #[serde(default)]
    pub views: Option<u64>,
}
