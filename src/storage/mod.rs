//! Change-detection store abstractions.
//!
//! The store owns the cross-run memory of the pipeline: which listings
//! have been seen before, what their fields looked like, and the
//! append-only ledger of runs. Reconciliation classifies each incoming
//! listing as new, updated, or unchanged; listings absent from a run's
//! canonical set are left untouched, because the feed's visible window
//! is not assumed to be exhaustive.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Config, Listing, RunReport, StoredListing};

// Re-export for convenience
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Classification result for one run's canonical listing set.
///
/// Every incoming listing lands in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub new: Vec<Listing>,
    pub updated: Vec<Listing>,
    pub unchanged: Vec<Listing>,
}

impl Reconciliation {
    pub fn total(&self) -> usize {
        self.new.len() + self.updated.len() + self.unchanged.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty()
    }
}

/// Trait for change-detection store backends.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Comparison keys of every persisted listing link. Feeds the
    /// materializer's smart-stop check.
    async fn known_links(&self) -> Result<HashSet<String>>;

    /// Reconcile a run's canonical set against persisted state.
    ///
    /// Atomic per listing and idempotent: reconciling the same set with
    /// the same `as_of` twice yields identical state and an empty
    /// updated bucket on the second call.
    async fn reconcile(&self, listings: &[Listing], as_of: DateTime<Utc>)
    -> Result<Reconciliation>;

    /// Open a run ledger entry; returns its id.
    async fn start_run(&self, started_at: DateTime<Utc>) -> Result<i64>;

    /// Close a run ledger entry with its final report.
    async fn finish_run(&self, run_id: i64, report: &RunReport) -> Result<()>;

    /// Most recently discovered listings, newest first.
    async fn recent_listings(&self, limit: i64) -> Result<Vec<StoredListing>>;
}

/// Connect to PostgreSQL, falling back to the in-memory store when the
/// database is unreachable. In fallback mode results still flow
/// downstream, but with no durable previously-seen comparison: every
/// listing looks new except within this process's lifetime.
pub async fn connect_or_fallback(config: &Config) -> Arc<dyn ListingStore> {
    match PgStore::connect(&config.store).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::warn!("{e}; falling back to in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}
