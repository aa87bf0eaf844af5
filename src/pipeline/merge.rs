// src/pipeline/merge.rs

//! Record merging.
//!
//! Unions the two extraction strategies' candidate sets into one
//! canonical listing set keyed by normalized link. When both strategies
//! saw the same listing, the more complete candidate wins; on a tie the
//! card candidate does, since it observed more context than the
//! structured block.

use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::models::{ExtractionCandidate, Listing, Provenance};
use crate::utils::url::canonical_key;

/// Merge candidates into the run's canonical listing set.
///
/// Post-conditions, checked before the set leaves the pipeline: output
/// links are non-empty and pairwise distinct under normalization.
pub fn merge(
    structured: Vec<ExtractionCandidate>,
    cards: Vec<ExtractionCandidate>,
) -> Result<Vec<Listing>> {
    // Structured blocks often carry the clean title for cards whose
    // anchor text was all metadata.
    let structured_names: HashMap<String, String> = structured
        .iter()
        .filter(|c| !c.listing.name.is_empty())
        .map(|c| (canonical_key(&c.listing.link), c.listing.name.clone()))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, ExtractionCandidate> = HashMap::new();

    for candidate in structured.into_iter().chain(cards) {
        if candidate.listing.link.is_empty() {
            continue;
        }
        let key = canonical_key(&candidate.listing.link);

        match best.get(&key) {
            None => {
                order.push(key.clone());
                best.insert(key, candidate);
            }
            Some(current) => {
                if prefer(&candidate, current) {
                    best.insert(key, candidate);
                }
            }
        }
    }

    let mut listings = Vec::with_capacity(order.len());
    for key in &order {
        let candidate = best
            .remove(key)
            .ok_or_else(|| AppError::merge_invariant(format!("lost group for key {key}")))?;
        let mut listing = candidate.listing;

        if listing.name.is_empty() {
            if let Some(name) = structured_names.get(key) {
                listing.name = name.clone();
            }
        }
        listings.push(listing);
    }

    verify(&listings)?;
    log::info!("Merged extraction output into {} listings", listings.len());
    Ok(listings)
}

/// Whether `candidate` should replace `current` for the same key.
fn prefer(candidate: &ExtractionCandidate, current: &ExtractionCandidate) -> bool {
    let (a, b) = (candidate.completeness(), current.completeness());
    a > b
        || (a == b
            && candidate.provenance == Provenance::Card
            && current.provenance == Provenance::StructuredData)
}

fn verify(listings: &[Listing]) -> Result<()> {
    let mut keys = std::collections::HashSet::new();
    for listing in listings {
        if listing.link.is_empty() {
            return Err(AppError::merge_invariant("listing with empty link"));
        }
        if !keys.insert(canonical_key(&listing.link)) {
            return Err(AppError::merge_invariant(format!(
                "duplicate canonical link {}",
                listing.link
            )));
        }
    }
    Ok(())
}
