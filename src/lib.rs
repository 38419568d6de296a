//! Catalog-Mirror: a local, queryable mirror of a remote tool catalog
//!
//! This crate discovers catalog entries through the paginated listing endpoint,
//! fetches every entry's detail page under a global rate limit, extracts
//! structured records, and persists them through a [`storage::Store`].

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Catalog-Mirror operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Giving up on {url} after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        source: Box<CatalogError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(
        "Update cancelled after {} of {} tools",
        .summary.processed,
        .summary.total
    )]
    UpdateCancelled { summary: crawler::UpdateSummary },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Extraction error: {0}")]
    Extract(#[from] crawler::ExtractError),

    #[error("Discovery failed: {source}")]
    DiscoveryFailed { source: Box<CatalogError> },

    #[error("Invalid update transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::UpdatePhase,
        to: state::UpdatePhase,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl CatalogError {
    /// Returns true if this error was caused by cancellation or deadline expiry
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled | Self::UpdateCancelled { .. } => true,
            Self::RetriesExhausted { source, .. } | Self::DiscoveryFailed { source } => {
                source.is_cancelled()
            }
            Self::Storage(storage::StorageError::Cancelled) => true,
            _ => false,
        }
    }

    /// Counts reached by an update run that was cancelled part way
    pub fn partial_summary(&self) -> Option<&crawler::UpdateSummary> {
        match self {
            Self::UpdateCancelled { summary } => Some(summary),
            _ => None,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] ::url::ParseError),

    #[error("URL cannot carry path segments: {0}")]
    CannotBeABase(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Catalog-Mirror operations
pub type Result<T> = std::result::Result<T, CatalogError>;


// Re-export commonly used types
pub use catalog::{
    DetailRecord, InstallInstructionRecord, ListingItem, ListingPage, ToolRecord,
};
pub use config::Config;
pub use state::{ProgressEvent, UpdatePhase};
