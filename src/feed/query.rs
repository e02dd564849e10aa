//! Pure translation of a filter snapshot into a feed request.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. Personalized with no watchlist symbols → [`FeedQuery::Empty`], no network call.
//! 2. Personalized → symbols only. Category preferences are dropped so that news about a
//!    tracked stock is never hidden by an unrelated category choice.
//! 3. Trending → trending flag; the time range is ignored.
//! 4. General → time range (unless `all`) and, only when authenticated, the identity's
//!    categories.
//!
//! Search text, page and page size are attached in every mode.

use super::filter::{AuthContext, FeedMode, FilterState, TimeRange};

/// Mode-specific part of a news request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// Headlines mentioning any of these tickers.
    Stocks(Vec<String>),
    Trending { categories: Vec<String> },
    General {
        time_range: TimeRange,
        categories: Vec<String>,
    },
}

/// Normalized news request, ready to be stamped with a generation and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsQuery {
    pub page: u32,
    pub page_size: u32,
    pub search_text: String,
    pub scope: QueryScope,
}

/// Output of [`compose`]: either a request or the empty-result sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedQuery {
    /// Render an empty single page without touching the network.
    Empty,
    Fetch(NewsQuery),
}

pub fn compose(filter: &FilterState, auth: &AuthContext, page: u32, page_size: u32) -> FeedQuery {
    let page = page.max(1);
    let page_size = page_size.max(1);
    let search_text = filter.search_text.trim().to_string();

    let scope = match filter.mode {
        FeedMode::Personalized => {
            let symbols: Vec<String> = filter
                .watchlist_symbols
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if symbols.is_empty() {
                return FeedQuery::Empty;
            }
            QueryScope::Stocks(symbols)
        }
        FeedMode::Trending => QueryScope::Trending {
            categories: categories_for(filter, auth),
        },
        FeedMode::General => QueryScope::General {
            time_range: filter.time_range,
            categories: categories_for(filter, auth),
        },
    };

    FeedQuery::Fetch(NewsQuery {
        page,
        page_size,
        search_text,
        scope,
    })
}

/// Categories are only ever sent on behalf of a signed-in identity.
fn categories_for(filter: &FilterState, auth: &AuthContext) -> Vec<String> {
    if !auth.is_authenticated() {
        return Vec::new();
    }
    filter.categories.iter().cloned().collect()
}

impl NewsQuery {
    /// Category filter carried by this request, if any.
    pub fn categories(&self) -> Option<&[String]> {
        match &self.scope {
            QueryScope::Trending { categories } | QueryScope::General { categories, .. }
                if !categories.is_empty() =>
            {
                Some(categories.as_slice())
            }
            _ => None,
        }
    }

    pub fn stocks(&self) -> Option<&[String]> {
        match &self.scope {
            QueryScope::Stocks(symbols) => Some(symbols.as_slice()),
            _ => None,
        }
    }

    pub fn filter_type(&self) -> Option<&'static str> {
        match &self.scope {
            QueryScope::Trending { .. } => Some("trending"),
            QueryScope::General { time_range, .. } => time_range.as_param(),
            QueryScope::Stocks(_) => None,
        }
    }

    /// Query-string parameters for `GET /news`.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if !self.search_text.is_empty() {
            params.push(("q", self.search_text.clone()));
        }
        if let Some(stocks) = self.stocks() {
            params.push(("stocks", stocks.join(",")));
        }
        if let Some(categories) = self.categories() {
            params.push(("categories", categories.join(",")));
        }
        if let Some(filter_type) = self.filter_type() {
            params.push(("filter_type", filter_type.to_string()));
        }
        params
    }
}
