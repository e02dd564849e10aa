//! marketfeed: a personalized market-news feed synchronization engine.
//!
//! - [`feed`] - Filter snapshots, query composition, sequencing, paging and timers
//! - [`watchlist`] - Optimistic watchlist replica
//! - [`remote`] - The service seam and its HTTP implementation
//! - [`storage`] / [`preferences`] - Per-identity preference persistence
//! - [`engine`] - The engine, its completion handling and the runner task
//! - [`config`] - TOML configuration

pub mod config;
pub mod engine;
pub mod feed;
pub mod preferences;
pub mod remote;
pub mod storage;
pub mod util;
pub mod watchlist;
