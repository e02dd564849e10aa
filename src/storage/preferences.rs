use async_trait::async_trait;

use super::schema::Database;
use super::{PreferenceStore, StoreError};

impl Database {
    // ========================================================================
    // User Preferences Operations
    // ========================================================================

    /// Get a single preference value by key.
    ///
    /// # Returns
    ///
    /// The preference value if the key exists, or `None` if not set.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from_sqlx)?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a preference value (UPSERT).
    ///
    /// Inserts the key-value pair if it doesn't exist, or updates the value and
    /// timestamp if the key already exists.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for Database {
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_preference(key).await
    }

    async fn set_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_preference(key, value).await
    }
}
