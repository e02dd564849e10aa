//! Keyed preference store.
//!
//! Everything persisted on behalf of an identity goes through [`PreferenceStore`], addressed
//! by `(identity, kind)`. The key layout lives in one place, [`preference_key`].

mod memory;
mod preferences;
mod schema;
mod types;

use async_trait::async_trait;

pub use memory::MemoryPreferences;
pub use schema::Database;
pub use types::{preference_key, PreferenceKind, StoreError};

/// Raw string storage plus the identity-scoped accessors built on it.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(
        &self,
        identity: Option<&str>,
        kind: PreferenceKind,
    ) -> Result<Option<String>, StoreError> {
        self.get_value(&preference_key(identity, kind)).await
    }

    async fn set(
        &self,
        identity: Option<&str>,
        kind: PreferenceKind,
        value: &str,
    ) -> Result<(), StoreError> {
        self.set_value(&preference_key(identity, kind), value).await
    }
}
