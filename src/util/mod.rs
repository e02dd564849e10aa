//! Utility functions for common operations.
//!
//! - **URL validation**: the API base URL must be https, or http on loopback

mod url_validator;

pub use url_validator::{validate_api_base, UrlValidationError};
