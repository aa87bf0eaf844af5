//! In-memory store implementation.
//!
//! Fallback backend for when PostgreSQL is unreachable, and the test
//! double for everything that needs a store. Holds the same
//! reconciliation semantics as the persistent backend, scoped to the
//! process lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Listing, RunReport, StoredListing};
use crate::storage::{ListingStore, Reconciliation};
use crate::utils::url::canonical_key;

#[derive(Default)]
struct Inner {
    listings: HashMap<String, StoredListing>,
    runs: Vec<RunReport>,
}

/// Non-durable store backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::store_unavailable("in-memory store poisoned"))
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn known_links(&self) -> Result<HashSet<String>> {
        let inner = self.lock()?;
        Ok(inner
            .listings
            .keys()
            .map(|link| canonical_key(link))
            .collect())
    }

    async fn reconcile(
        &self,
        listings: &[Listing],
        as_of: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        use std::collections::hash_map::Entry;

        let mut inner = self.lock()?;
        let mut outcome = Reconciliation::default();

        for listing in listings {
            match inner.listings.entry(listing.link.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(StoredListing {
                        link: listing.link.clone(),
                        external_id: listing.external_id.clone(),
                        name: listing.name.clone(),
                        price: listing.price.clone(),
                        address: listing.address.clone(),
                        size: listing.size.clone(),
                        first_seen: as_of,
                        last_seen: as_of,
                    });
                    outcome.new.push(listing.clone());
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.listing().content_differs(listing) {
                        existing.external_id = listing.external_id.clone();
                        existing.name = listing.name.clone();
                        existing.price = listing.price.clone();
                        existing.address = listing.address.clone();
                        existing.size = listing.size.clone();
                        existing.last_seen = as_of;
                        outcome.updated.push(listing.clone());
                    } else {
                        existing.last_seen = as_of;
                        outcome.unchanged.push(listing.clone());
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn start_run(&self, started_at: DateTime<Utc>) -> Result<i64> {
        let mut inner = self.lock()?;
        inner.runs.push(RunReport::started(started_at));
        Ok(inner.runs.len() as i64)
    }

    async fn finish_run(&self, run_id: i64, report: &RunReport) -> Result<()> {
        let mut inner = self.lock()?;
        let index = (run_id - 1) as usize;
        match inner.runs.get_mut(index) {
            Some(slot) => {
                *slot = report.clone();
                Ok(())
            }
            None => Err(AppError::validation(format!("unknown run id {run_id}"))),
        }
    }

    async fn recent_listings(&self, limit: i64) -> Result<Vec<StoredListing>> {
        let inner = self.lock()?;
        let mut listings: Vec<StoredListing> = inner.listings.values().cloned().collect();
        listings.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        listings.truncate(limit.max(0) as usize);
        Ok(listings)
    }
}
