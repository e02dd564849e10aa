//! Local replica of the remote watchlist with optimistic add/remove.
//!
//! `WatchlistSync` holds no I/O. The engine calls `begin_*` before it issues the remote
//! call and `complete_*` with the result; the replica is updated optimistically at
//! `begin_*` and rolled back at `complete_*` on failure. At most one mutation per symbol
//! is in flight at a time.

use std::collections::HashMap;

use crate::remote::WatchlistEntry;

// ============================================================================
// Outcomes
// ============================================================================

/// Result of a watchlist mutation as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The replica already reflects the remote store.
    Applied,
    /// Applied optimistically; the remote call has not completed.
    Pending,
    /// The remote store refused; the replica was restored. `detail` is the server's reason.
    RolledBack { detail: String },
}

/// What `begin_add`/`begin_remove` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    /// Optimistic change applied; the remote call must be issued.
    Dispatch,
    /// Nothing to send. The outcome is already known.
    Settled(MutationOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Confirmed,
    PendingAdd,
}

#[derive(Debug, Clone)]
struct ReplicaEntry {
    entry: WatchlistEntry,
    state: EntryState,
}

#[derive(Debug, Clone)]
enum InFlight {
    Add,
    /// Removed optimistically from `index`; restored there on failure.
    Remove { entry: WatchlistEntry, index: usize },
}

/// Trimmed, upper-cased ticker. Symbols compare in this form.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

// ============================================================================
// WatchlistSync
// ============================================================================

#[derive(Debug, Default)]
pub struct WatchlistSync {
    entries: Vec<ReplicaEntry>,
    in_flight: HashMap<String, InFlight>,
}

impl WatchlistSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimistically insert `entry` at the end of the replica.
    ///
    /// A symbol that is already present returns `Applied`; one with a mutation in
    /// flight returns `Pending`. Neither dispatches a second remote call.
    pub fn begin_add(&mut self, entry: WatchlistEntry) -> Begin {
        let symbol = normalize_symbol(&entry.symbol);
        if self.in_flight.contains_key(&symbol) {
            return Begin::Settled(MutationOutcome::Pending);
        }
        if self.position(&symbol).is_some() {
            return Begin::Settled(MutationOutcome::Applied);
        }

        self.entries.push(ReplicaEntry {
            entry: WatchlistEntry::new(symbol.clone(), entry.display_name),
            state: EntryState::PendingAdd,
        });
        self.in_flight.insert(symbol, InFlight::Add);
        Begin::Dispatch
    }

    /// Settle an add. `Err` carries the server's reason.
    ///
    /// A success leaves the entry confirmed in the replica, even if a refresh
    /// replaced the replica while the call was in flight.
    pub fn complete_add(
        &mut self,
        entry: &WatchlistEntry,
        result: Result<(), String>,
    ) -> MutationOutcome {
        let symbol = normalize_symbol(&entry.symbol);
        let tracked = matches!(self.in_flight.get(&symbol), Some(InFlight::Add));
        if tracked {
            self.in_flight.remove(&symbol);
        }

        match result {
            Ok(()) => {
                match self.position(&symbol) {
                    Some(i) => self.entries[i].state = EntryState::Confirmed,
                    // A newer mutation of the symbol decides its presence
                    None if !self.in_flight.contains_key(&symbol) => {
                        self.entries.push(ReplicaEntry {
                            entry: WatchlistEntry::new(symbol, entry.display_name.clone()),
                            state: EntryState::Confirmed,
                        });
                    }
                    None => {}
                }
                MutationOutcome::Applied
            }
            Err(detail) => {
                // Only the optimistic copy is removed; a replica refreshed meanwhile is left alone
                if tracked {
                    if let Some(i) = self.position(&symbol) {
                        if self.entries[i].state == EntryState::PendingAdd {
                            self.entries.remove(i);
                        }
                    }
                }
                MutationOutcome::RolledBack { detail }
            }
        }
    }

    /// Optimistically drop `symbol` from the replica.
    ///
    /// An absent symbol is already removed (`Applied`); a symbol with a mutation in
    /// flight returns `Pending`.
    pub fn begin_remove(&mut self, symbol: &str) -> Begin {
        let symbol = normalize_symbol(symbol);
        if self.in_flight.contains_key(&symbol) {
            return Begin::Settled(MutationOutcome::Pending);
        }
        let Some(index) = self.position(&symbol) else {
            return Begin::Settled(MutationOutcome::Applied);
        };

        let removed = self.entries.remove(index);
        self.in_flight.insert(
            symbol,
            InFlight::Remove {
                entry: removed.entry,
                index,
            },
        );
        Begin::Dispatch
    }

    /// Settle a remove. On failure the entry goes back to its prior position.
    pub fn complete_remove(&mut self, symbol: &str, result: Result<(), String>) -> MutationOutcome {
        let symbol = normalize_symbol(symbol);
        let restore = match self.in_flight.get(&symbol) {
            Some(InFlight::Remove { .. }) => self.in_flight.remove(&symbol),
            _ => None,
        };

        match result {
            Ok(()) => {
                // A refresh may have brought the entry back while the call was in flight
                if !self.in_flight.contains_key(&symbol) {
                    if let Some(i) = self.position(&symbol) {
                        self.entries.remove(i);
                    }
                }
                MutationOutcome::Applied
            }
            Err(detail) => {
                if let Some(InFlight::Remove { entry, index }) = restore {
                    if self.position(&symbol).is_none() {
                        let index = index.min(self.entries.len());
                        self.entries.insert(
                            index,
                            ReplicaEntry {
                                entry,
                                state: EntryState::Confirmed,
                            },
                        );
                    }
                }
                MutationOutcome::RolledBack { detail }
            }
        }
    }

    /// Replace the whole replica with the remote store's list. Never merges.
    ///
    /// Outstanding mutations are forgotten. A late success still applies (the remote store
    /// has the change); a late failure leaves the refreshed replica alone.
    pub fn replace_all(&mut self, entries: Vec<WatchlistEntry>) {
        self.in_flight.clear();
        self.entries.clear();
        for entry in entries {
            let symbol = normalize_symbol(&entry.symbol);
            if symbol.is_empty() || self.position(&symbol).is_some() {
                continue;
            }
            self.entries.push(ReplicaEntry {
                entry: WatchlistEntry::new(symbol, entry.display_name),
                state: EntryState::Confirmed,
            });
        }
    }

    pub fn clear(&mut self) {
        self.replace_all(Vec::new());
    }

    /// Symbols in replica order, including optimistic adds.
    pub fn symbols(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.entry.symbol.clone()).collect()
    }

    /// Replica entries in order, including optimistic adds.
    pub fn entries(&self) -> Vec<WatchlistEntry> {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }

    /// Entries the remote store has acknowledged. This is what gets cached.
    pub fn confirmed(&self) -> Vec<WatchlistEntry> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Confirmed)
            .map(|e| e.entry.clone())
            .collect()
    }

    pub fn state_of(&self, symbol: &str) -> Option<EntryState> {
        self.position(&normalize_symbol(symbol))
            .map(|i| self.entries[i].state)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.position(&normalize_symbol(symbol)).is_some()
    }

    pub fn is_in_flight(&self, symbol: &str) -> bool {
        self.in_flight.contains_key(&normalize_symbol(symbol))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, normalized: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.entry.symbol == normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(symbol: &str) -> WatchlistEntry {
        WatchlistEntry::new(symbol, format!("{} Ltd", symbol))
    }

    fn seeded(symbols: &[&str]) -> WatchlistSync {
        let mut sync = WatchlistSync::new();
        sync.replace_all(symbols.iter().map(|s| entry(s)).collect());
        sync
    }

    #[test]
    fn test_add_then_confirm() {
        let mut sync = WatchlistSync::new();
        assert_eq!(sync.begin_add(entry("TCS")), Begin::Dispatch);
        assert_eq!(sync.state_of("TCS"), Some(EntryState::PendingAdd));
        assert!(sync.confirmed().is_empty());

        assert_eq!(sync.complete_add(&entry("TCS"), Ok(())), MutationOutcome::Applied);
        assert_eq!(sync.state_of("TCS"), Some(EntryState::Confirmed));
        assert!(!sync.is_in_flight("TCS"));
    }

    #[test]
    fn test_duplicate_add_while_in_flight_is_deduplicated() {
        let mut sync = WatchlistSync::new();
        assert_eq!(sync.begin_add(entry("TCS")), Begin::Dispatch);
        assert_eq!(
            sync.begin_add(entry("TCS")),
            Begin::Settled(MutationOutcome::Pending)
        );
        // Case and whitespace do not make a different symbol
        assert_eq!(
            sync.begin_add(entry(" tcs ")),
            Begin::Settled(MutationOutcome::Pending)
        );
        assert_eq!(sync.symbols(), vec!["TCS"]);
    }

    #[test]
    fn test_add_of_confirmed_symbol_is_noop() {
        let mut sync = seeded(&["TCS"]);
        assert_eq!(
            sync.begin_add(entry("TCS")),
            Begin::Settled(MutationOutcome::Applied)
        );
        assert_eq!(sync.len(), 1);
    }

    #[test]
    fn test_failed_add_rolls_back_with_detail() {
        let mut sync = seeded(&["INFY"]);
        sync.begin_add(entry("TCS"));

        let outcome = sync.complete_add(&entry("TCS"), Err("Stock already in watchlist".into()));
        assert_eq!(
            outcome,
            MutationOutcome::RolledBack {
                detail: "Stock already in watchlist".into()
            }
        );
        assert_eq!(sync.symbols(), vec!["INFY"]);
        assert!(!sync.is_in_flight("TCS"));
    }

    #[test]
    fn test_remove_failure_restores_prior_position() {
        let mut sync = seeded(&["INFY", "TCS", "HDFCBANK"]);
        assert_eq!(sync.begin_remove("TCS"), Begin::Dispatch);
        assert_eq!(sync.symbols(), vec!["INFY", "HDFCBANK"]);

        let outcome = sync.complete_remove("TCS", Err("not found".into()));
        assert_eq!(
            outcome,
            MutationOutcome::RolledBack {
                detail: "not found".into()
            }
        );
        assert_eq!(sync.symbols(), vec!["INFY", "TCS", "HDFCBANK"]);
        assert_eq!(sync.state_of("TCS"), Some(EntryState::Confirmed));
    }

    #[test]
    fn test_remove_success() {
        let mut sync = seeded(&["INFY", "TCS"]);
        sync.begin_remove("tcs");
        assert_eq!(sync.complete_remove("TCS", Ok(())), MutationOutcome::Applied);
        assert_eq!(sync.symbols(), vec!["INFY"]);
    }

    #[test]
    fn test_remove_absent_is_applied_without_dispatch() {
        let mut sync = seeded(&["INFY"]);
        assert_eq!(
            sync.begin_remove("TCS"),
            Begin::Settled(MutationOutcome::Applied)
        );
    }

    #[test]
    fn test_remove_while_add_in_flight_is_pending() {
        let mut sync = WatchlistSync::new();
        sync.begin_add(entry("TCS"));
        assert_eq!(
            sync.begin_remove("TCS"),
            Begin::Settled(MutationOutcome::Pending)
        );
        assert!(sync.contains("TCS"));
    }

    #[test]
    fn test_rollback_index_clamped_when_replica_shrank() {
        let mut sync = seeded(&["A", "B", "C"]);
        sync.begin_remove("C");
        sync.begin_remove("B");
        assert_eq!(sync.complete_remove("B", Ok(())), MutationOutcome::Applied);

        // C was at index 2, only one entry is left
        sync.complete_remove("C", Err("boom".into()));
        assert_eq!(sync.symbols(), vec!["A", "C"]);
    }

    #[test]
    fn test_replace_all_never_merges() {
        let mut sync = seeded(&["INFY", "TCS"]);
        sync.begin_add(entry("WIPRO"));

        sync.replace_all(vec![entry("HDFCBANK"), entry("hdfcbank"), entry("  ")]);
        assert_eq!(sync.symbols(), vec!["HDFCBANK"]);
        assert!(!sync.is_in_flight("WIPRO"));

        // Late failure of the forgotten add leaves the refreshed replica alone
        let outcome = sync.complete_add(&entry("WIPRO"), Err("late".into()));
        assert!(matches!(outcome, MutationOutcome::RolledBack { .. }));
        assert_eq!(sync.symbols(), vec!["HDFCBANK"]);
    }

    #[test]
    fn test_add_confirmed_after_refresh_dropped_it() {
        let mut sync = WatchlistSync::new();
        sync.begin_add(entry("TCS"));
        sync.replace_all(Vec::new());
        assert!(sync.is_empty());

        assert_eq!(sync.complete_add(&entry("tcs"), Ok(())), MutationOutcome::Applied);
        assert_eq!(sync.confirmed(), vec![entry("TCS")]);
    }

    #[test]
    fn test_late_add_success_yields_to_newer_add() {
        let mut sync = WatchlistSync::new();
        sync.begin_add(entry("TCS"));
        sync.replace_all(Vec::new());
        sync.begin_add(entry("TCS"));

        sync.complete_add(&entry("TCS"), Ok(()));
        assert_eq!(sync.symbols(), vec!["TCS"]);
        assert!(sync.is_in_flight("TCS"));
        assert_eq!(sync.state_of("TCS"), Some(EntryState::PendingAdd));
    }

    #[test]
    fn test_remove_success_drops_entry_a_refresh_restored() {
        let mut sync = seeded(&["INFY", "TCS"]);
        sync.begin_remove("TCS");
        sync.replace_all(vec![entry("INFY"), entry("TCS")]);

        assert_eq!(sync.complete_remove("TCS", Ok(())), MutationOutcome::Applied);
        assert_eq!(sync.symbols(), vec!["INFY"]);
    }

    #[test]
    fn test_confirmed_excludes_pending_adds() {
        let mut sync = seeded(&["INFY"]);
        sync.begin_add(entry("TCS"));
        assert_eq!(sync.entries().len(), 2);
        assert_eq!(sync.confirmed(), vec![entry("INFY")]);
    }
}
