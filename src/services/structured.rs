// src/services/structured.rs

//! Structured-data extraction.
//!
//! Scans embedded machine-readable item-list blocks (`application/ld+json`)
//! for listing names and URLs. Individual malformed blocks are skipped;
//! a broken block never aborts the scan.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use crate::models::{ExtractionCandidate, Listing, Provenance};
use crate::utils::text::normalize_space;
use crate::utils::url::resolve_url;

static LD_JSON: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("ld+json selector")
});

/// Extract listing candidates from the page's item-list blocks.
///
/// Only name and link are available at this level; the card extractor
/// supplies the richer fields and the merger prefers completeness.
pub fn extract_structured(html: &str, base_url: &Url) -> Vec<ExtractionCandidate> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();

    for script in document.select(&LD_JSON) {
        let raw: String = script.text().collect();
        let data: Value = match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("Skipping malformed structured-data block: {e}");
                continue;
            }
        };

        // A block may hold a single object or an array of them.
        let payloads: Vec<&Value> = match &data {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for payload in payloads {
            if payload.get("@type").and_then(Value::as_str) != Some("ItemList") {
                continue;
            }
            let Some(elements) = payload.get("itemListElement").and_then(Value::as_array) else {
                continue;
            };

            for element in elements {
                if let Some(candidate) = candidate_from_element(element, base_url) {
                    candidates.push(candidate);
                }
            }
        }
    }

    log::debug!("Structured data yielded {} candidates", candidates.len());
    candidates
}

fn candidate_from_element(element: &Value, base_url: &Url) -> Option<ExtractionCandidate> {
    let mut url = element.get("url").and_then(Value::as_str);
    let mut name = element.get("name").and_then(Value::as_str);

    // Both fields may live on a nested item object instead.
    if let Some(item) = element.get("item").filter(|i| i.is_object()) {
        url = url
            .or_else(|| item.get("url").and_then(Value::as_str))
            .or_else(|| item.get("@id").and_then(Value::as_str));
        name = name.or_else(|| item.get("name").and_then(Value::as_str));
    }

    let url = url?;
    let link = resolve_url(base_url, url);
    if link.is_empty() {
        return None;
    }

    Some(ExtractionCandidate::new(
        Listing {
            link,
            external_id: None,
            name: normalize_space(name.unwrap_or_default()),
            price: None,
            address: None,
            size: None,
        },
        Provenance::StructuredData,
    ))
}
