//! PostgreSQL store implementation.
//!
//! Two tables: `listings` keyed by link with first/last-seen
//! bookkeeping, and `runs`, the append-only ledger of pipeline
//! invocations. The schema is bootstrapped at connect time so a fresh
//! database works without a separate migration step.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{AppError, Result};
use crate::models::{Listing, RunReport, StoreConfig, StoredListing};
use crate::storage::{ListingStore, Reconciliation};
use crate::utils::url::canonical_key;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS listings (
    link        TEXT PRIMARY KEY,
    external_id TEXT,
    name        TEXT NOT NULL DEFAULT '',
    price       TEXT,
    address     TEXT,
    size        TEXT,
    first_seen  TIMESTAMPTZ NOT NULL,
    last_seen   TIMESTAMPTZ NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_listings_first_seen ON listings (first_seen DESC);

CREATE TABLE IF NOT EXISTS runs (
    id             BIGSERIAL PRIMARY KEY,
    started_at     TIMESTAMPTZ NOT NULL,
    finished_at    TIMESTAMPTZ,
    listings_found INT NOT NULL DEFAULT 0,
    new_count      INT NOT NULL DEFAULT 0,
    updated_count  INT NOT NULL DEFAULT 0,
    status         TEXT NOT NULL,
    error_detail   TEXT
);
"#;

/// PostgreSQL store backend.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bootstrap the schema.
    ///
    /// An unreachable database is a `StoreUnavailable` error so callers
    /// can degrade to the in-memory fallback.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .map_err(AppError::store_unavailable)?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(AppError::store_unavailable)?;

        log::info!("Connected to listing store");
        Ok(Self { pool })
    }

    /// Reconcile one listing inside its own transaction, so a failure
    /// can never leave a partially updated row behind.
    async fn reconcile_one(
        &self,
        listing: &Listing,
        as_of: DateTime<Utc>,
    ) -> Result<crate::models::Classification> {
        use crate::models::Classification;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT external_id, name, price, address, size \
             FROM listings WHERE link = $1 FOR UPDATE",
        )
        .bind(&listing.link)
        .fetch_optional(&mut *tx)
        .await?;

        let classification = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO listings \
                     (link, external_id, name, price, address, size, first_seen, last_seen) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
                )
                .bind(&listing.link)
                .bind(&listing.external_id)
                .bind(&listing.name)
                .bind(&listing.price)
                .bind(&listing.address)
                .bind(&listing.size)
                .bind(as_of)
                .execute(&mut *tx)
                .await?;
                Classification::New
            }
            Some(row) => {
                let persisted = Listing {
                    link: listing.link.clone(),
                    external_id: row.get("external_id"),
                    name: row.get::<Option<String>, _>("name").unwrap_or_default(),
                    price: row.get("price"),
                    address: row.get("address"),
                    size: row.get("size"),
                };

                if persisted.content_differs(listing) {
                    sqlx::query(
                        "UPDATE listings SET external_id = $2, name = $3, price = $4, \
                         address = $5, size = $6, last_seen = $7, updated_at = now() \
                         WHERE link = $1",
                    )
                    .bind(&listing.link)
                    .bind(&listing.external_id)
                    .bind(&listing.name)
                    .bind(&listing.price)
                    .bind(&listing.address)
                    .bind(&listing.size)
                    .bind(as_of)
                    .execute(&mut *tx)
                    .await?;
                    Classification::Updated
                } else {
                    sqlx::query(
                        "UPDATE listings SET last_seen = $2, updated_at = now() WHERE link = $1",
                    )
                    .bind(&listing.link)
                    .bind(as_of)
                    .execute(&mut *tx)
                    .await?;
                    Classification::Unchanged
                }
            }
        };

        tx.commit().await?;
        Ok(classification)
    }
}

#[async_trait]
impl ListingStore for PgStore {
    async fn known_links(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT link FROM listings")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| canonical_key(row.get::<&str, _>("link")))
            .collect())
    }

    async fn reconcile(
        &self,
        listings: &[Listing],
        as_of: DateTime<Utc>,
    ) -> Result<Reconciliation> {
        use crate::models::Classification;

        let mut outcome = Reconciliation::default();
        // Writes are strictly sequential within a run; per-link
        // serialization for any future concurrent caller comes from the
        // row lock taken inside each transaction.
        for listing in listings {
            match self.reconcile_one(listing, as_of).await? {
                Classification::New => outcome.new.push(listing.clone()),
                Classification::Updated => outcome.updated.push(listing.clone()),
                Classification::Unchanged => outcome.unchanged.push(listing.clone()),
            }
        }

        log::info!(
            "Reconciled {} listings: {} new, {} updated, {} unchanged",
            outcome.total(),
            outcome.new.len(),
            outcome.updated.len(),
            outcome.unchanged.len()
        );
        Ok(outcome)
    }

    async fn start_run(&self, started_at: DateTime<Utc>) -> Result<i64> {
        let row = sqlx::query("INSERT INTO runs (started_at, status) VALUES ($1, $2) RETURNING id")
            .bind(started_at)
            .bind("running")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("id"))
    }

    async fn finish_run(&self, run_id: i64, report: &RunReport) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET finished_at = $2, listings_found = $3, new_count = $4, \
             updated_count = $5, status = $6, error_detail = $7 WHERE id = $1",
        )
        .bind(run_id)
        .bind(report.finished_at)
        .bind(report.listings_found as i32)
        .bind(report.new_count as i32)
        .bind(report.updated_count as i32)
        .bind(report.status.as_str())
        .bind(&report.error_detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_listings(&self, limit: i64) -> Result<Vec<StoredListing>> {
        let listings = sqlx::query_as::<_, StoredListing>(
            "SELECT link, external_id, name, price, address, size, first_seen, last_seen \
             FROM listings ORDER BY first_seen DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(listings)
    }
}
