//! Configuration file parser for ~/.config/marketfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::engine::EngineSettings;
use crate::remote::ClientSettings;
use crate::util::{validate_api_base, UrlValidationError};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid api_base_url: {0}")]
    InvalidBaseUrl(#[from] UrlValidationError),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the news/market/watchlist service.
    pub api_base_url: String,

    /// Identity (email) to sign in as on startup. Unset means signed out.
    pub identity: Option<String>,

    /// Articles per page.
    pub page_size: u32,

    /// Background refresh interval in seconds (minimum 1).
    pub poll_interval_secs: u64,

    /// Quiet period before search input is applied, in milliseconds.
    pub search_debounce_ms: u64,

    pub request_timeout_secs: u64,

    /// Retries for idempotent reads on transient failures. Mutations are never retried.
    pub max_retries: u32,

    pub retry_base_delay_ms: u64,

    /// Ticker search results kept in memory.
    pub ticker_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            identity: None,
            page_size: 24,
            poll_interval_secs: 30,
            search_debounce_ms: 500,
            request_timeout_secs: 15,
            max_retries: 2,
            retry_base_delay_ms: 500,
            ticker_cache_size: 64,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "api_base_url",
        "identity",
        "page_size",
        "poll_interval_secs",
        "search_debounce_ms",
        "request_timeout_secs",
        "max_retries",
        "retry_base_delay_ms",
        "ticker_cache_size",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Unusable `api_base_url` → `Err(ConfigError::InvalidBaseUrl)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid loading a huge or corrupted file
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.api_base()?;
        tracing::info!(path = %path.display(), api_base_url = %config.api_base_url, "Loaded configuration");
        Ok(config)
    }

    /// The validated service base URL.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        Ok(validate_api_base(&self.api_base_url)?)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            page_size: self.page_size.max(1),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            search_debounce: Duration::from_millis(self.search_debounce_ms),
            ticker_cache_size: NonZeroUsize::new(self.ticker_cache_size)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
