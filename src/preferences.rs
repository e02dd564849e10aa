//! Typed access to the per-identity preferences the engine persists.
//!
//! Values are stored as JSON strings in a [`PreferenceStore`]. A value that no longer
//! decodes is reported as [`StoreError::Corrupt`]; callers treat it as absent.
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::remote::WatchlistEntry;
use crate::storage::{preference_key, PreferenceKind, PreferenceStore, StoreError};

// ============================================================================
// Preferences
// ============================================================================

#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Selected categories for `identity` (the signed-out scope when `None`).
    pub async fn categories(&self, identity: Option<&str>) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .load(identity, PreferenceKind::Categories)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_categories(
        &self,
        identity: Option<&str>,
        categories: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        self.save(identity, PreferenceKind::Categories, categories)
            .await
    }

    /// Cached watchlist replica from the last session, if any.
    pub async fn watchlist(&self, identity: &str) -> Result<Vec<WatchlistEntry>, StoreError> {
        Ok(self
            .load(Some(identity), PreferenceKind::Watchlist)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_watchlist(
        &self,
        identity: &str,
        entries: &[WatchlistEntry],
    ) -> Result<(), StoreError> {
        self.save(Some(identity), PreferenceKind::Watchlist, entries)
            .await
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        identity: Option<&str>,
        kind: PreferenceKind,
    ) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(identity, kind).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: preference_key(identity, kind),
                reason: e.to_string(),
            })
    }

    async fn save<T: serde::Serialize + ?Sized>(
        &self,
        identity: Option<&str>,
        kind: PreferenceKind,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
            key: preference_key(identity, kind),
            reason: e.to_string(),
        })?;
        self.store.set(identity, kind, &raw).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, MemoryPreferences};
    use pretty_assertions::assert_eq;

    fn memory() -> (Arc<MemoryPreferences>, Preferences) {
        let store = Arc::new(MemoryPreferences::new());
        (store.clone(), Preferences::new(store))
    }

    #[tokio::test]
    async fn test_missing_values_default_empty() {
        let (_, prefs) = memory();
        assert!(prefs.categories(Some("a@x.io")).await.unwrap().is_empty());
        assert!(prefs.watchlist("a@x.io").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_categories_round_trip_per_identity() {
        let (_, prefs) = memory();
        let it: BTreeSet<String> = ["IT".to_string(), "Banking".to_string()].into();
        prefs.save_categories(Some("a@x.io"), &it).await.unwrap();

        assert_eq!(prefs.categories(Some("a@x.io")).await.unwrap(), it);
        assert!(prefs.categories(Some("b@x.io")).await.unwrap().is_empty());
        assert!(prefs.categories(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watchlist_uses_service_field_names() {
        let (store, prefs) = memory();
        prefs
            .save_watchlist("a@x.io", &[WatchlistEntry::new("TCS", "Tata Consultancy")])
            .await
            .unwrap();

        let raw = store.get_value("watchlist.a@x.io").await.unwrap().unwrap();
        assert_eq!(raw, r#"[{"symbol":"TCS","name":"Tata Consultancy"}]"#);
    }

    #[tokio::test]
    async fn test_corrupt_value_reported() {
        let (store, prefs) = memory();
        store.set_value("categories.a@x.io", "{not json").await.unwrap();

        let err = prefs.categories(Some("a@x.io")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "categories.a@x.io"));
    }

    #[tokio::test]
    async fn test_sqlite_backend() {
        let db = Database::open(":memory:").await.unwrap();
        let prefs = Preferences::new(Arc::new(db));
        let entries = vec![
            WatchlistEntry::new("INFY", "Infosys"),
            WatchlistEntry::new("TCS", "Tata Consultancy"),
        ];
        prefs.save_watchlist("a@x.io", &entries).await.unwrap();
        assert_eq!(prefs.watchlist("a@x.io").await.unwrap(), entries);
    }
}
