//! Feed view building blocks: what to ask for, when to ask, and which answer to keep.
//!
//! - [`filter`] - The immutable `FilterState` snapshot and the auth context
//! - [`query`] - Pure composition of a filter snapshot into a news request
//! - [`sequencer`] - Generation counters that discard stale responses
//! - [`pagination`] - Server-derived page cursor and the truncated page strip
//! - [`debounce`] - Quiescence timer for free-text search
//! - [`polling`] - Background refresh timer and its tick rules

pub mod debounce;
pub mod filter;
pub mod pagination;
pub mod polling;
pub mod query;
pub mod sequencer;

pub use debounce::SearchDebouncer;
pub use filter::{AuthContext, FeedMode, FilterState, TimeRange};
pub use pagination::{PageSlot, PaginationCursor};
pub use polling::{PollingScheduler, TickPlan};
pub use query::{compose, FeedQuery, NewsQuery, QueryScope};
pub use sequencer::{Generation, RequestSequencer, Stamped};
