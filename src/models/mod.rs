// src/models/mod.rs

//! Domain models for the watcher application.
//!
//! This module contains all data structures used throughout the
//! application, organized by their primary purpose.

mod candidate;
mod config;
mod listing;
mod run;

// Re-export all public types
pub use candidate::{ExtractionCandidate, Provenance};
pub use config::{
    BrowserConfig, Config, DispatchConfig, ExtractConfig, FeedConfig, SchedulerConfig, StoreConfig,
};
pub use listing::{Classification, Listing, StoredListing};
pub use run::{RunReport, RunStatus};
