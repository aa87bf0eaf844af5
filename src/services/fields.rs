// src/services/fields.rs

//! Field-extraction strategies for listing cards.
//!
//! Each rule is an explicit tagged strategy returning an optional typed
//! value. Callers chain strategies in a fixed priority order; the tag
//! records which rule produced a value and how trustworthy it is.

use std::sync::LazyLock;

use regex::Regex;

use crate::utils::text::normalize_space;

/// Which extraction rule produced a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    /// Identifier from the `adId` query parameter
    IdQueryParam,
    /// Identifier from a trailing numeric path segment
    IdPathSegment,
    /// Price with leading currency symbol ("€ 1.000,50")
    PriceSymbolFirst,
    /// Price with trailing currency symbol ("1.000 €")
    PriceSymbolLast,
    /// Area amount followed by the m² marker
    SizeAreaUnit,
    /// Postal-code + locality shape found in free text
    AddressPostalShape,
    /// Explicitly tagged location element in the card markup
    AddressTaggedElement,
    /// Text line matching a known regional name fragment
    AddressRegionLine,
    /// Longest plausible line free of price/size metadata
    AddressInformativeLine,
}

/// How much to trust a value given the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Inferred,
    Explicit,
}

impl FieldStrategy {
    pub fn confidence(&self) -> Confidence {
        match self {
            FieldStrategy::AddressRegionLine | FieldStrategy::AddressInformativeLine => {
                Confidence::Inferred
            }
            _ => Confidence::Explicit,
        }
    }
}

/// A field value together with the strategy that extracted it.
#[derive(Debug, Clone)]
pub struct FieldValue {
    pub value: String,
    pub strategy: FieldStrategy,
}

impl FieldValue {
    fn new(value: impl Into<String>, strategy: FieldStrategy) -> Self {
        Self {
            value: value.into(),
            strategy,
        }
    }
}

static ID_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]adId=(\d+)").expect("adId regex"));
static ID_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/-](\d{6,})/?$").expect("path id regex"));

// Austrian/German number shape: dot-separated thousands, comma decimals.
static PRICE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"€\s*(\d{1,3}(?:\.\d{3})*(?:,\d{2})?)\b").expect("price regex"));
static PRICE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{3})*(?:,\d{2})?)\s*€").expect("price suffix regex")
});

static SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*m²").expect("size regex"));

// Postal code followed by a locality, stopping before price fragments.
static ADDRESS_POSTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}\s+[A-ZÄÖÜa-zäöüß][^€]+?(?:Bezirk|[A-ZÄÖÜ][a-zäöüß]+)(?:,\s*[^€\d]+)?")
        .expect("postal address regex")
});
static ADDRESS_TRAILING_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d+\s*m².*$").expect("trailing size regex"));
static ADDRESS_TRAILING_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*€.*$").expect("trailing price regex"));
static ADDRESS_TRAILING_ROOMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d+\s*Zimmer.*$").expect("trailing rooms regex"));

// Regional name fragments that mark a line as a location.
static REGION_FRAGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(Wien|Bezirk|Niederösterreich|Oberösterreich|Steiermark|Burgenland|Salzburg|Tirol|Vorarlberg|Kärnten)\b",
    )
    .expect("region fragment regex")
});
static LINE_METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)€|m²|Zimmer|Gesamtmiete|Kaution|Betriebskosten").expect("metadata regex")
});

// Name-cleaning passes, applied in order.
static NAME_POSTAL_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{4}\s+Wien,\s+\d+\.\s+Bezirk[^€]*").expect("postal tail"));
static NAME_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d+(?:[.,]\d+)?\s*m²").expect("name size"));
static NAME_PRICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*€\s*[\d.\s,]+").expect("name price"));
static NAME_ROOMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d+\s+Zimmer\b").expect("name rooms"));
static NAME_FEATURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(Balkon|Loggia|Terrasse|Garten)\s*$").expect("features"));
static NAME_AGENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(?:GmbH|OG|KG|AG|Immobilien|Privat)\s*$").expect("agency suffix")
});
static NAME_STREET_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),\s+[A-ZÄÖÜ][a-zäöüß]+(?:straße|gasse|platz|weg)\s*$").expect("street tail")
});

/// Extract a listing identifier from an anchor href.
///
/// Prefers the query-parameter form, falling back to a trailing numeric
/// run of at least six digits at the end of the path (both the bare
/// `/123456789/` segment shape and the slug-suffix `-123456789/` shape).
pub fn external_id(href: &str) -> Option<FieldValue> {
    if let Some(caps) = ID_QUERY.captures(href) {
        return Some(FieldValue::new(&caps[1], FieldStrategy::IdQueryParam));
    }
    if let Some(caps) = ID_PATH.captures(href) {
        return Some(FieldValue::new(&caps[1], FieldStrategy::IdPathSegment));
    }
    None
}

/// Extract a price string from card text.
pub fn price(text: &str) -> Option<FieldValue> {
    if let Some(caps) = PRICE_PREFIX.captures(text) {
        return Some(FieldValue::new(
            format!("€ {}", normalize_space(&caps[1])),
            FieldStrategy::PriceSymbolFirst,
        ));
    }
    if let Some(caps) = PRICE_SUFFIX.captures(text) {
        return Some(FieldValue::new(
            format!("{} €", normalize_space(&caps[1])),
            FieldStrategy::PriceSymbolLast,
        ));
    }
    None
}

/// Extract an apartment size string from card text ("54 m²").
pub fn size(text: &str) -> Option<FieldValue> {
    let caps = SIZE.captures(text)?;
    let value = caps[1].replace(',', ".");
    Some(FieldValue::new(
        format!("{value} m²"),
        FieldStrategy::SizeAreaUnit,
    ))
}

/// Pull a postal-code + locality address out of free text, trimming
/// trailing metadata that the lazy match may have swallowed.
pub fn address_from_text(text: &str) -> Option<String> {
    let m = ADDRESS_POSTAL.find(text)?;
    let mut address = m.as_str().to_string();
    address = ADDRESS_TRAILING_SIZE.replace(&address, "").into_owned();
    address = ADDRESS_TRAILING_PRICE.replace(&address, "").into_owned();
    address = ADDRESS_TRAILING_ROOMS.replace(&address, "").into_owned();
    let address = normalize_space(&address);
    (!address.is_empty()).then_some(address)
}

/// Guess the address from a card's text lines.
///
/// Lines naming a known region win; otherwise the first sufficiently
/// long line free of price/size metadata. Approximate by design: may
/// return no value, never a fabricated one.
pub fn guess_address(lines: &[String], min_len: usize) -> Option<FieldValue> {
    for line in lines {
        if REGION_FRAGMENT.is_match(line) {
            let value = address_from_text(line).unwrap_or_else(|| line.clone());
            return Some(FieldValue::new(value, FieldStrategy::AddressRegionLine));
        }
    }

    lines
        .iter()
        .find(|line| line.chars().count() >= min_len && !LINE_METADATA.is_match(line))
        .map(|line| FieldValue::new(line.clone(), FieldStrategy::AddressInformativeLine))
}

/// Clean a listing name of extraction artifacts: postal fragments,
/// sizes, prices, room counts, trailing feature words, agency suffixes
/// and street-name tails that leak in from sibling card text.
pub fn clean_name(name: &str) -> String {
    let mut name = name.to_string();
    name = NAME_POSTAL_TAIL.replace_all(&name, "").into_owned();
    name = NAME_SIZE.replace_all(&name, "").into_owned();
    name = NAME_PRICE.replace_all(&name, "").into_owned();
    name = NAME_ROOMS.replace_all(&name, "").into_owned();
    name = NAME_FEATURES.replace(&name, "").into_owned();
    name = NAME_AGENCY.replace(&name, "").into_owned();
    name = NAME_STREET_TAIL.replace(&name, "").into_owned();

    normalize_space(&name)
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_query_param() {
        let id = external_id("/iad/x?adId=123456789").unwrap();
        assert_eq!(id.value, "123456789");
        assert_eq!(id.strategy, FieldStrategy::IdQueryParam);
    }

    #[test]
    fn test_external_id_path_segment() {
        let id = external_id("/iad/immobilien/d/wohnung-987654321/").unwrap();
        assert_eq!(id.value, "987654321");
        assert_eq!(id.strategy, FieldStrategy::IdPathSegment);
    }

    #[test]
    fn test_external_id_rejects_short_segments() {
        assert!(external_id("/iad/immobilien/d/123/").is_none());
    }

    #[test]
    fn test_price_symbol_first() {
        let p = price("Miete € 1.000,50 warm").unwrap();
        assert_eq!(p.value, "€ 1.000,50");
        assert_eq!(p.strategy, FieldStrategy::PriceSymbolFirst);
    }

    #[test]
    fn test_price_stops_before_postal_code() {
        let p = price("€ 900 1190 Wien").unwrap();
        assert_eq!(p.value, "€ 900");
    }

    #[test]
    fn test_price_symbol_last() {
        let p = price("900 € pro Monat").unwrap();
        assert_eq!(p.value, "900 €");
        assert_eq!(p.strategy, FieldStrategy::PriceSymbolLast);
    }

    #[test]
    fn test_size_normalizes_decimal_comma() {
        let s = size("Wohnfläche 54,5 m²").unwrap();
        assert_eq!(s.value, "54.5 m²");
    }

    #[test]
    fn test_address_from_text() {
        let addr = address_from_text("Schöne Lage 1190 Wien, 19. Bezirk, Döbling 54 m² € 900");
        assert_eq!(addr.as_deref(), Some("1190 Wien, 19. Bezirk, Döbling"));
    }

    #[test]
    fn test_guess_address_prefers_region_line() {
        let lines = vec!["€ 900".to_string(), "1190 Wien".to_string()];
        let guess = guess_address(&lines, 6).unwrap();
        assert_eq!(guess.value, "1190 Wien");
        assert_eq!(guess.strategy, FieldStrategy::AddressRegionLine);
        assert_eq!(guess.strategy.confidence(), Confidence::Inferred);
    }

    #[test]
    fn test_guess_address_falls_back_to_informative_line() {
        let lines = vec![
            "€ 900".to_string(),
            "54 m²".to_string(),
            "Nähe Stadtpark, ruhige Lage".to_string(),
        ];
        let guess = guess_address(&lines, 6).unwrap();
        assert_eq!(guess.strategy, FieldStrategy::AddressInformativeLine);
    }

    #[test]
    fn test_guess_address_yields_nothing_without_plausible_line() {
        let lines = vec!["€ 900".to_string(), "54 m²".to_string()];
        assert!(guess_address(&lines, 6).is_none());
    }

    #[test]
    fn test_clean_name_strips_artifacts() {
        assert_eq!(
            clean_name("Helle Wohnung 3 Zimmer 54 m² € 900"),
            "Helle Wohnung"
        );
        assert_eq!(clean_name("Gartenwohnung Balkon"), "Gartenwohnung");
        assert_eq!(clean_name("Schöne Lage Immobilien"), "Schöne Lage");
    }

    #[test]
    fn test_clean_name_keeps_plain_titles() {
        assert_eq!(clean_name("Altbau in Döbling"), "Altbau in Döbling");
    }
}
