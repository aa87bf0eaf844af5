//! Strategy-scoped extraction results, prior to merging.

use crate::models::Listing;

/// Which extraction strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Machine-readable item-list block embedded in the page
    StructuredData,
    /// Heuristic DOM traversal of a rendered listing card
    Card,
}

/// An ephemeral extraction result. Never persisted; merged into the
/// canonical listing set at the end of extraction.
#[derive(Debug, Clone)]
pub struct ExtractionCandidate {
    pub listing: Listing,
    pub provenance: Provenance,
}

impl ExtractionCandidate {
    pub fn new(listing: Listing, provenance: Provenance) -> Self {
        Self {
            listing,
            provenance,
        }
    }

    /// Field-completeness score used for merge tie-breaking: the count
    /// of populated optional fields.
    pub fn completeness(&self) -> usize {
        let l = &self.listing;
        [
            l.external_id.is_some(),
            l.price.is_some(),
            l.address.is_some(),
            l.size.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_listing(link: &str) -> Listing {
        Listing {
            link: link.to_string(),
            external_id: None,
            name: String::new(),
            price: None,
            address: None,
            size: None,
        }
    }

    #[test]
    fn test_completeness_counts_optional_fields() {
        let mut listing = bare_listing("https://example.com/d/1");
        let candidate = ExtractionCandidate::new(listing.clone(), Provenance::StructuredData);
        assert_eq!(candidate.completeness(), 0);

        listing.price = Some("€ 900".into());
        listing.size = Some("54 m²".into());
        let candidate = ExtractionCandidate::new(listing, Provenance::Card);
        assert_eq!(candidate.completeness(), 2);
    }
}
