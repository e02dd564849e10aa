//! The filter snapshot that decides which news the feed shows.
//!
//! `FilterState` is a value type: every change produces a new snapshot through the
//! `with_*` methods and the engine swaps it in wholesale. Nothing mutates a snapshot
//! that an in-flight request was composed from.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Axes
// ============================================================================

/// Publication window applied to the general feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeRange {
    #[default]
    All,
    ThisWeek,
    LastWeek,
    ThisMonth,
    ThisYear,
}

impl TimeRange {
    /// Value sent as `filter_type`, or `None` for the unrestricted range.
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            TimeRange::All => None,
            TimeRange::ThisWeek => Some("this_week"),
            TimeRange::LastWeek => Some("last_week"),
            TimeRange::ThisMonth => Some("this_month"),
            TimeRange::ThisYear => Some("this_year"),
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TimeRange::All),
            "this_week" | "week" => Ok(TimeRange::ThisWeek),
            "last_week" => Ok(TimeRange::LastWeek),
            "this_month" | "month" => Ok(TimeRange::ThisMonth),
            "this_year" | "year" => Ok(TimeRange::ThisYear),
            other => Err(format!("unknown time range '{}'", other)),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param().unwrap_or("all"))
    }
}

/// Personalization strategy. Personalized and trending ignore the time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedMode {
    #[default]
    General,
    /// "For Me": only news about the watchlist symbols.
    Personalized,
    Trending,
}

impl FromStr for FeedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" | "all" => Ok(FeedMode::General),
            "personalized" | "for_me" | "for-me" => Ok(FeedMode::Personalized),
            "trending" => Ok(FeedMode::Trending),
            other => Err(format!("unknown feed mode '{}'", other)),
        }
    }
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FeedMode::General => "general",
            FeedMode::Personalized => "personalized",
            FeedMode::Trending => "trending",
        };
        f.write_str(name)
    }
}

// ============================================================================
// FilterState
// ============================================================================

/// Immutable snapshot of every axis that selects feed content.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterState {
    pub time_range: TimeRange,
    pub mode: FeedMode,
    /// Settled free-text search. The live, still-debouncing input lives in the engine.
    pub search_text: String,
    /// Category preferences of the current identity. Empty means unrestricted.
    pub categories: BTreeSet<String>,
    /// Watchlist symbols in replica order.
    pub watchlist_symbols: Vec<String>,
}

impl FilterState {
    pub fn with_mode(&self, mode: FeedMode) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }

    pub fn with_time_range(&self, time_range: TimeRange) -> Self {
        Self {
            time_range,
            ..self.clone()
        }
    }

    pub fn with_search_text(&self, search_text: impl Into<String>) -> Self {
        Self {
            search_text: search_text.into(),
            ..self.clone()
        }
    }

    pub fn with_categories(&self, categories: BTreeSet<String>) -> Self {
        Self {
            categories,
            ..self.clone()
        }
    }

    pub fn with_watchlist_symbols(&self, watchlist_symbols: Vec<String>) -> Self {
        Self {
            watchlist_symbols,
            ..self.clone()
        }
    }

    /// True when a change from `previous` to `self` must restart polling and fetch
    /// immediately (time range, mode, categories or watchlist changed).
    pub fn requires_refetch_from(&self, previous: &FilterState) -> bool {
        self.time_range != previous.time_range
            || self.mode != previous.mode
            || self.categories != previous.categories
            || self.watchlist_symbols != previous.watchlist_symbols
    }
}

/// Who is asking. Unauthenticated requests never carry category preferences.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthContext {
    identity: Option<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self { identity: None }
    }

    /// Identities are compared case-insensitively by the remote store, so they are
    /// normalized to lowercase here. Blank identities count as signed out.
    pub fn signed_in(identity: &str) -> Self {
        let identity = identity.trim().to_lowercase();
        if identity.is_empty() {
            return Self::anonymous();
        }
        Self {
            identity: Some(identity),
        }
    }

    pub fn from_identity(identity: Option<&str>) -> Self {
        identity.map(Self::signed_in).unwrap_or_default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}
