use std::fmt;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Preference store errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another instance of the application has locked the database
    #[error("Another instance of marketfeed appears to be running. Please close it and try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored value could not be decoded
    #[error("Corrupt preference '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Map a sqlx error, recognising lock contention
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::Locked;
        }
        StoreError::Database(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as text only.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Preference Kinds
// ============================================================================

/// What a stored preference holds. Each kind is scoped per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKind {
    /// Selected news categories (JSON array of strings)
    Categories,
    /// Cached watchlist replica (JSON array of `{symbol, name}`)
    Watchlist,
}

impl PreferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PreferenceKind::Categories => "categories",
            PreferenceKind::Watchlist => "watchlist",
        }
    }
}

impl fmt::Display for PreferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage key for `kind` under `identity`.
///
/// Keys use the dotted convention `{kind}.{identity}`; the signed-out scope is the bare
/// kind. Identities are expected to be normalized already (see `AuthContext`).
pub fn preference_key(identity: Option<&str>, kind: PreferenceKind) -> String {
    match identity {
        Some(identity) => format!("{}.{}", kind, identity),
        None => kind.as_str().to_string(),
    }
}
