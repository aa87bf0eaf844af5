// src/pipeline/run.rs

//! One end-to-end pipeline invocation.
//!
//! Materialize the feed, run both extraction strategies over the same
//! markup snapshot in parallel, merge, reconcile against the store, and
//! produce the run report. A failed run leaves persisted state exactly
//! as it was; the next run starts from a clean baseline.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Config, Listing, RunReport};
use crate::pipeline::merge::merge;
use crate::services::{Materializer, extract_cards, extract_structured};
use crate::storage::{ListingStore, Reconciliation};
use crate::utils::url::build_feed_url;

/// Everything one run produced, success or not.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub listings: Vec<Listing>,
    pub reconciliation: Reconciliation,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.report.status == crate::models::RunStatus::Success
    }
}

/// The discovery and change-detection pipeline, wired to its
/// collaborators by construction.
pub struct Pipeline {
    config: Arc<Config>,
    materializer: Arc<dyn Materializer>,
    store: Arc<dyn ListingStore>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        materializer: Arc<dyn Materializer>,
        store: Arc<dyn ListingStore>,
    ) -> Self {
        Self {
            config,
            materializer,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ListingStore> {
        &self.store
    }

    /// Run the pipeline once, always yielding exactly one run report.
    pub async fn execute(&self, shutdown: &mut watch::Receiver<bool>) -> RunOutcome {
        let started_at = Utc::now();
        let report = RunReport::started(started_at);

        let run_id = match self.store.start_run(started_at).await {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Could not open run ledger entry: {e}");
                None
            }
        };

        let outcome = match self.run_inner(shutdown).await {
            Ok((listings, reconciliation)) => {
                let report = report.succeed(
                    Utc::now(),
                    listings.len(),
                    reconciliation.new.len(),
                    reconciliation.updated.len(),
                );
                RunOutcome {
                    report,
                    listings,
                    reconciliation,
                }
            }
            Err(e) => {
                log::error!("Run failed: {e}");
                RunOutcome {
                    report: report.fail(Utc::now(), &e),
                    listings: Vec::new(),
                    reconciliation: Reconciliation::default(),
                }
            }
        };

        if let Some(run_id) = run_id {
            if let Err(e) = self.store.finish_run(run_id, &outcome.report).await {
                log::warn!("Could not close run ledger entry {run_id}: {e}");
            }
        }

        outcome
    }

    async fn run_inner(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(Vec<Listing>, Reconciliation)> {
        let as_of = Utc::now();
        let feed_url = build_feed_url(&self.config.feed)?;

        let known_links = if self.config.scheduler.smart_stop {
            match self.store.known_links().await {
                Ok(links) => links,
                Err(e) => {
                    log::warn!("Could not load known links, smart stop disabled: {e}");
                    HashSet::new()
                }
            }
        } else {
            HashSet::new()
        };

        let html = self
            .materializer
            .materialize(&feed_url, &known_links, shutdown)
            .await?;

        let listings = self.extract_and_merge(html).await?;
        if listings.is_empty() {
            log::warn!("No listings extracted from feed markup");
            return Ok((listings, Reconciliation::default()));
        }

        let reconciliation = self.store.reconcile(&listings, as_of).await?;
        Ok((listings, reconciliation))
    }

    /// Run both extraction strategies over the same immutable snapshot.
    ///
    /// They share no mutable state, so they parse in parallel on the
    /// blocking pool; the merge is the synchronization point.
    async fn extract_and_merge(&self, html: String) -> Result<Vec<Listing>> {
        let base = Url::parse(&self.config.feed.base_url)?;

        let structured_html = html.clone();
        let structured_base = base.clone();
        let structured_task = tokio::task::spawn_blocking(move || {
            extract_structured(&structured_html, &structured_base)
        });

        let rules = self.config.extract.clone();
        let cards_task =
            tokio::task::spawn_blocking(move || extract_cards(&html, &base, &rules));

        let (structured, cards) = tokio::join!(structured_task, cards_task);
        let structured =
            structured.map_err(|e| AppError::extraction(format!("structured scan panicked: {e}")))?;
        let cards = cards.map_err(|e| AppError::extraction(format!("card scan panicked: {e}")))?;

        log::debug!(
            "Extraction: {} structured candidates, {} card candidates",
            structured.len(),
            cards.len()
        );

        merge(structured, cards)
    }
}
