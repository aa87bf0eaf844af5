//! Listing data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A canonical listing extracted from the feed.
///
/// `link` is the identity key: a normalized absolute URL, never empty,
/// immutable once the listing exists. All other fields are display
/// content and may change between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listing {
    /// Normalized absolute URL of the detail page
    pub link: String,

    /// Site-native identifier; some cards omit it
    pub external_id: Option<String>,

    /// Display title, cleaned of extraction artifacts
    pub name: String,

    /// Free-text price string (e.g. "€ 900")
    pub price: Option<String>,

    /// Free-text location string; possibly heuristically inferred
    pub address: Option<String>,

    /// Free-text area string (e.g. "54 m²")
    pub size: Option<String>,
}

impl Listing {
    /// Whether the content fields differ from another listing with the
    /// same link. Drives the updated/unchanged classification.
    pub fn content_differs(&self, other: &Listing) -> bool {
        self.external_id != other.external_id
            || self.name != other.name
            || self.price != other.price
            || self.address != other.address
            || self.size != other.size
    }

    /// Format the listing for display using a template.
    ///
    /// Supported placeholders:
    /// - `{id}`, `{name}`, `{price}`, `{address}`, `{size}`, `{link}`
    pub fn format(&self, template: &str) -> String {
        let fallback = "N/A";
        template
            .replace("{id}", self.external_id.as_deref().unwrap_or(fallback))
            .replace("{name}", &self.name)
            .replace("{price}", self.price.as_deref().unwrap_or(fallback))
            .replace("{address}", self.address.as_deref().unwrap_or(fallback))
            .replace("{size}", self.size.as_deref().unwrap_or(fallback))
            .replace("{link}", &self.link)
    }
}

/// A listing as persisted by the change-detection store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredListing {
    pub link: String,
    pub external_id: Option<String>,
    pub name: String,
    pub price: Option<String>,
    pub address: Option<String>,
    pub size: Option<String>,

    /// Set once at creation, immutable afterwards
    pub first_seen: DateTime<Utc>,

    /// Updated on every run in which the listing reappears
    pub last_seen: DateTime<Utc>,
}

impl StoredListing {
    pub fn listing(&self) -> Listing {
        Listing {
            link: self.link.clone(),
            external_id: self.external_id.clone(),
            name: self.name.clone(),
            price: self.price.clone(),
            address: self.address.clone(),
            size: self.size.clone(),
        }
    }
}

/// How reconciliation classified one listing within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    Updated,
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_listing() -> Listing {
        Listing {
            link: "https://example.com/iad/d/wohnung-123456789".to_string(),
            external_id: Some("123456789".to_string()),
            name: "Helle 2-Zimmer-Wohnung".to_string(),
            price: Some("€ 900".to_string()),
            address: Some("1190 Wien, 19. Bezirk".to_string()),
            size: Some("54 m²".to_string()),
        }
    }

    #[test]
    fn test_format() {
        let listing = sample_listing();
        let result = listing.format("{name}: {price} ({size})");
        assert_eq!(result, "Helle 2-Zimmer-Wohnung: € 900 (54 m²)");
    }

    #[test]
    fn test_format_missing_fields() {
        let mut listing = sample_listing();
        listing.price = None;
        assert_eq!(listing.format("{price}"), "N/A");
    }

    #[test]
    fn test_content_differs() {
        let a = sample_listing();
        let mut b = a.clone();
        assert!(!a.content_differs(&b));

        b.price = Some("€ 950".to_string());
        assert!(a.content_differs(&b));
    }
}
