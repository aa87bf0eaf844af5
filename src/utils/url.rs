// src/utils/url.rs

//! URL manipulation utilities.
//!
//! Listing identity rests on URLs, so this module owns the two flavors
//! the pipeline cares about: the stored canonical form (absolute, as
//! extracted) and the comparison key (tracking noise stripped).

use url::Url;

use crate::error::Result;
use crate::models::FeedConfig;

/// Query parameters that carry tracking/session state rather than
/// listing identity. Stripped for comparison, kept in the stored value.
const TRACKING_PARAMS: [&str; 5] = ["gclid", "fbclid", "ref", "source", "isNavigation"];

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Comparison key for a listing link.
///
/// Strips tracking query parameters and the trailing slash so that
/// cosmetic variants of the same detail URL collapse to one identity.
/// The stored listing keeps its original canonical form.
pub fn canonical_key(link: &str) -> String {
    let Ok(mut url) = Url::parse(link) else {
        return link.trim_end_matches('/').to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.iter().any(|p| p.eq_ignore_ascii_case(&key))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let mut out = url.to_string();
    while out.ends_with('/') {
        out.pop();
    }
    out
}

/// Insert or override the `rows` query parameter on a feed URL.
///
/// The rows value is a soft hint to the feed, not a completeness
/// guarantee; rendering decides how much actually materializes.
pub fn set_rows_param(feed_url: &str, rows: u32) -> Result<String> {
    let mut url = Url::parse(feed_url)?;

    let others: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "rows")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &others {
            pairs.append_pair(k, v);
        }
        pairs.append_pair("rows", &rows.to_string());
    }

    Ok(url.to_string())
}

/// Build the feed URL from configuration.
///
/// An explicit `feed.url` wins; otherwise base URL + listing path +
/// the configured filter parameters.
pub fn build_feed_url(feed: &FeedConfig) -> Result<String> {
    if let Some(explicit) = &feed.url {
        return set_rows_param(explicit, feed.rows);
    }

    let mut url = Url::parse(&feed.base_url)?.join(&feed.listing_path)?;

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("rows", &feed.rows.to_string());

        if let Some(sort) = &feed.sort {
            pairs.append_pair("sort", sort);
        }
        if let Some(price_to) = feed.price_to {
            pairs.append_pair("PRICE_TO", &price_to.to_string());
        }
        if let Some(area_from) = feed.living_area_from {
            pairs.append_pair("ESTATE_SIZE/LIVING_AREA_FROM", &area_from.to_string());
        }
        for area in &feed.area_ids {
            pairs.append_pair("areaId", area);
        }
        for bucket in &feed.room_buckets {
            pairs.append_pair("NO_OF_ROOMS_BUCKET", bucket);
        }
        for property in &feed.property_types {
            pairs.append_pair("PROPERTY_TYPE", property);
        }
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/iad/").unwrap();
        assert_eq!(
            resolve_url(&base, "/iad/immobilien/d/wohnung-123456789/"),
            "https://example.com/iad/immobilien/d/wohnung-123456789/"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_canonical_key_strips_trailing_slash() {
        assert_eq!(
            canonical_key("https://example.com/iad/d/123456/"),
            "https://example.com/iad/d/123456"
        );
    }

    #[test]
    fn test_canonical_key_strips_tracking_params() {
        assert_eq!(
            canonical_key("https://example.com/iad/x?adId=111&utm_source=mail&gclid=abc"),
            "https://example.com/iad/x?adId=111"
        );
    }

    #[test]
    fn test_canonical_key_keeps_identity_params() {
        assert_eq!(
            canonical_key("https://example.com/iad/x?adId=111"),
            canonical_key("https://example.com/iad/x/?adId=111&utm_medium=feed")
        );
    }

    #[test]
    fn test_set_rows_param_overrides() {
        let url = set_rows_param("https://example.com/feed?rows=30&sort=1", 200).unwrap();
        assert!(url.contains("rows=200"));
        assert!(url.contains("sort=1"));
        assert!(!url.contains("rows=30"));
    }

    #[test]
    fn test_build_feed_url_from_parts() {
        let feed = FeedConfig {
            url: None,
            base_url: "https://www.willhaben.at".into(),
            listing_path: "/iad/immobilien/mietwohnungen/mietwohnung-angebote".into(),
            rows: 90,
            sort: Some("1".into()),
            price_to: Some(1200),
            living_area_from: None,
            area_ids: vec!["900".into(), "117223".into()],
            room_buckets: vec![],
            property_types: vec![],
        };
        let url = build_feed_url(&feed).unwrap();
        assert!(url.starts_with("https://www.willhaben.at/iad/immobilien/"));
        assert!(url.contains("rows=90"));
        assert!(url.contains("PRICE_TO=1200"));
        assert!(url.contains("areaId=900"));
        assert!(url.contains("areaId=117223"));
    }
}
