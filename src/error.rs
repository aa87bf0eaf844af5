// src/error.rs

//! Unified error handling for the watcher application.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Navigation or render failure; the whole run fails without
    /// touching persisted state.
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// A single structured block or card was malformed. Skipped where
    /// it occurs, never escalated past the extraction engine.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// The merger emitted a set that breaks its own guarantees.
    /// Unreachable in a correct build; fatal for the run if seen.
    #[error("Merge invariant violated: {0}")]
    MergeInvariant(String),

    /// The persisted store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A downstream handler failed for one listing.
    #[error("Dispatch error for {link}: {message}")]
    Dispatch { link: String, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Database query failed
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a fetch error with the URL it occurred on.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error.
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    /// Create a merge invariant error.
    pub fn merge_invariant(message: impl Into<String>) -> Self {
        Self::MergeInvariant(message.into())
    }

    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl fmt::Display) -> Self {
        Self::StoreUnavailable(message.to_string())
    }

    /// Create a dispatch error scoped to one listing link.
    pub fn dispatch(link: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Dispatch {
            link: link.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
