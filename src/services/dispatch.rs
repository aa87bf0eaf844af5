// src/services/dispatch.rs

//! Downstream handlers for newly discovered listings.
//!
//! The pipeline only needs two capability shapes: a notifier that takes
//! a listing and reports success or failure, and a photo fetcher that
//! takes a listing link and returns a local storage handle. Handler
//! failures are isolated per listing and never fail the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{AppError, Result};
use crate::models::{Config, Listing};

/// Telegram caps message text at 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends a notification about one listing.
#[async_trait]
pub trait ListingNotifier: Send + Sync {
    async fn notify(&self, listing: &Listing) -> Result<()>;
}

/// Retrieves photos for one listing link, returning where they landed.
#[async_trait]
pub trait PhotoFetcher: Send + Sync {
    async fn fetch_photos(&self, link: &str) -> Result<PathBuf>;
}

/// Outcome of dispatching one run's new listings.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub dispatched: usize,
    pub failures: usize,
}

/// Fans new listings out to the registered handlers with a bounded
/// worker pool. Handlers run sequentially per listing (photos first so
/// the notification can reference them); one listing's failure never
/// blocks the next.
pub struct Dispatcher {
    notifier: Option<Arc<dyn ListingNotifier>>,
    photo_fetcher: Option<Arc<dyn PhotoFetcher>>,
    concurrency: usize,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        Self {
            notifier: None,
            photo_fetcher: None,
            concurrency: config.scheduler.dispatch_concurrency,
            handler_timeout: Duration::from_secs(config.scheduler.handler_timeout_secs),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ListingNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_photo_fetcher(mut self, fetcher: Arc<dyn PhotoFetcher>) -> Self {
        self.photo_fetcher = Some(fetcher);
        self
    }

    pub fn has_handlers(&self) -> bool {
        self.notifier.is_some() || self.photo_fetcher.is_some()
    }

    pub async fn dispatch_new(&self, listings: &[Listing]) -> DispatchOutcome {
        if !self.has_handlers() || listings.is_empty() {
            return DispatchOutcome::default();
        }

        let results = stream::iter(listings)
            .map(|listing| self.dispatch_one(listing))
            .buffer_unordered(self.concurrency.max(1))
            .collect::<Vec<bool>>()
            .await;

        let failures = results.iter().filter(|ok| !**ok).count();
        DispatchOutcome {
            dispatched: results.len(),
            failures,
        }
    }

    /// Run all handlers for one listing. Returns false if any failed.
    async fn dispatch_one(&self, listing: &Listing) -> bool {
        let mut ok = true;

        if let Some(fetcher) = &self.photo_fetcher {
            match tokio::time::timeout(self.handler_timeout, fetcher.fetch_photos(&listing.link))
                .await
            {
                Ok(Ok(dir)) => {
                    log::debug!("Photos for {} stored in {}", listing.link, dir.display());
                }
                Ok(Err(e)) => {
                    log::warn!("Photo fetch failed for {}: {e}", listing.link);
                    ok = false;
                }
                Err(_) => {
                    log::warn!("Photo fetch timed out for {}", listing.link);
                    ok = false;
                }
            }
        }

        if let Some(notifier) = &self.notifier {
            match tokio::time::timeout(self.handler_timeout, notifier.notify(listing)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("Notification failed for {}: {e}", listing.link);
                    ok = false;
                }
                Err(_) => {
                    log::warn!("Notification timed out for {}", listing.link);
                    ok = false;
                }
            }
        }

        ok
    }
}

/// Notifier posting listing cards to a Telegram chat via the Bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Build the notifier from configuration, if credentials are set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let token = config.dispatch.telegram_bot_token.as_deref()?;
        let chat = config.dispatch.telegram_chat_id.as_deref()?;
        Some(Self::new(token, chat))
    }
}

/// Format one listing as an HTML Telegram message.
pub fn format_message(listing: &Listing) -> String {
    let message = format!(
        "🏠 <b>New Apartment Listing</b>\n\n\
         <b>Name:</b> {}\n\
         <b>Price:</b> {}\n\
         <b>Address:</b> {}\n\
         <b>Size:</b> {}\n\n\
         <a href='{}'>View Listing</a>",
        listing.name,
        listing.price.as_deref().unwrap_or("N/A"),
        listing.address.as_deref().unwrap_or("N/A"),
        listing.size.as_deref().unwrap_or("N/A"),
        listing.link,
    );
    truncate_graphemes(&message, MAX_MESSAGE_CHARS)
}

/// Truncate to a character budget without splitting a grapheme cluster.
fn truncate_graphemes(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }

    let budget = max.saturating_sub(1);
    let mut out = String::new();
    let mut used = 0;
    for grapheme in text.graphemes(true) {
        let chars = grapheme.chars().count();
        if used + chars > budget {
            break;
        }
        out.push_str(grapheme);
        used += chars;
    }
    out + "…"
}

#[async_trait]
impl ListingNotifier for TelegramNotifier {
    async fn notify(&self, listing: &Listing) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": format_message(listing),
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::dispatch(&listing.link, e))?;

        if !response.status().is_success() {
            return Err(AppError::dispatch(
                &listing.link,
                format!("telegram responded {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Image URLs on the listing detail page worth downloading: the site's
/// media CDN paths, excluding logos and cross-listing thumbnails.
static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://cache\.willhaben\.at/mmo/[^"'\s\\]+?\.(?:jpg|jpeg|png)"#)
        .expect("image url regex")
});
static IMAGE_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)logo|icon|badge|_hoved").expect("image noise regex"));

/// Harvest gallery image URLs from detail-page markup, upgraded to the
/// large rendition and deduplicated in document order.
pub fn harvest_image_urls(html: &str, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();

    for m in IMAGE_URL.find_iter(html) {
        let url = m
            .as_str()
            .replace("/SMALL/", "/LARGE/")
            .replace("/MEDIUM/", "/LARGE/")
            .replace("/XS/", "/LARGE/")
            .replace("_thumb.jpg", ".jpg")
            .replace("_thumb.png", ".png");

        if IMAGE_NOISE.is_match(&url) {
            continue;
        }
        if seen.insert(url.clone()) {
            urls.push(url);
            if urls.len() >= max {
                break;
            }
        }
    }
    urls
}

/// Sharded directory for one listing's photos:
/// `{base}/ab/cd/<sha256(link)>`.
pub fn listing_photo_dir(base: &Path, link: &str) -> PathBuf {
    let digest = hex::encode(Sha256::digest(link.as_bytes()));
    base.join(&digest[..2]).join(&digest[2..4]).join(&digest)
}

/// Photo fetcher pulling gallery images from the listing detail page.
pub struct GalleryFetcher {
    client: reqwest::Client,
    photos_dir: PathBuf,
    max_photos: usize,
}

impl GalleryFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            photos_dir: PathBuf::from(&config.dispatch.photos_dir),
            max_photos: config.dispatch.max_photos,
        }
    }
}

#[async_trait]
impl PhotoFetcher for GalleryFetcher {
    async fn fetch_photos(&self, link: &str) -> Result<PathBuf> {
        let html = self
            .client
            .get(link)
            .send()
            .await
            .map_err(|e| AppError::dispatch(link, e))?
            .text()
            .await
            .map_err(|e| AppError::dispatch(link, e))?;

        let urls = harvest_image_urls(&html, self.max_photos);
        let dir = listing_photo_dir(&self.photos_dir, link);
        tokio::fs::create_dir_all(&dir).await?;

        let mut stored = 0usize;
        for (index, url) in urls.iter().enumerate() {
            let extension = if url.ends_with(".png") { "png" } else { "jpg" };
            let target = dir.join(format!("{:02}.{extension}", index + 1));
            if target.exists() {
                stored += 1;
                continue;
            }

            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| AppError::dispatch(link, e))?;
                    tokio::fs::write(&target, &bytes).await?;
                    stored += 1;
                }
                Ok(response) => {
                    log::debug!("Image fetch for {url} returned {}", response.status());
                }
                Err(e) => {
                    log::debug!("Image fetch for {url} failed: {e}");
                }
            }
        }

        log::debug!("Stored {stored} photos for {link}");
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_listing(link: &str) -> Listing {
        Listing {
            link: link.to_string(),
            external_id: Some("1".into()),
            name: "Wohnung".into(),
            price: Some("€ 900".into()),
            address: None,
            size: None,
        }
    }

    #[test]
    fn test_format_message_fills_fallbacks() {
        let message = format_message(&sample_listing("https://example.com/d/1"));
        assert!(message.contains("<b>Price:</b> € 900"));
        assert!(message.contains("<b>Address:</b> N/A"));
        assert!(message.contains("https://example.com/d/1"));
    }

    #[test]
    fn test_truncate_graphemes() {
        assert_eq!(truncate_graphemes("abc", 10), "abc");
        let truncated = truncate_graphemes(&"ä".repeat(5000), 4096);
        assert!(truncated.chars().count() <= 4096);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_harvest_image_urls_upgrades_and_filters() {
        let html = r#"
        <img src="https://cache.willhaben.at/mmo/1/234/MEDIUM/photo1.jpg">
        <img src="https://cache.willhaben.at/mmo/1/234/SMALL/photo2_thumb.jpg">
        <img src="https://cache.willhaben.at/mmo/logo/site_logo.png">
        <img src="https://cache.willhaben.at/mmo/1/234/MEDIUM/photo1.jpg">
        "#;

        let urls = harvest_image_urls(html, 10);
        assert_eq!(
            urls,
            vec![
                "https://cache.willhaben.at/mmo/1/234/LARGE/photo1.jpg",
                "https://cache.willhaben.at/mmo/1/234/LARGE/photo2.jpg",
            ]
        );
    }

    #[test]
    fn test_harvest_respects_cap() {
        let html = (0..5)
            .map(|i| format!(r#"<img src="https://cache.willhaben.at/mmo/x/{i}.jpg">"#))
            .collect::<String>();
        assert_eq!(harvest_image_urls(&html, 2).len(), 2);
    }

    #[test]
    fn test_listing_photo_dir_is_sharded() {
        let dir = listing_photo_dir(Path::new("photos"), "https://example.com/d/1");
        let components: Vec<_> = dir.components().collect();
        // photos / ab / cd / <full hash>
        assert_eq!(components.len(), 4);
    }

    struct FlakyNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ListingNotifier for FlakyNotifier {
        async fn notify(&self, listing: &Listing) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if listing.link.contains("bad") {
                return Err(AppError::dispatch(&listing.link, "boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failures() {
        let notifier = Arc::new(FlakyNotifier {
            calls: AtomicUsize::new(0),
        });
        let dispatcher =
            Dispatcher::new(&Config::default()).with_notifier(Arc::clone(&notifier) as _);

        let listings = vec![
            sample_listing("https://example.com/d/ok-1"),
            sample_listing("https://example.com/d/bad-2"),
            sample_listing("https://example.com/d/ok-3"),
        ];

        let outcome = dispatcher.dispatch_new(&listings).await;
        assert_eq!(outcome.dispatched, 3);
        assert_eq!(outcome.failures, 1);
        // Every listing was attempted despite the failure in the middle.
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dispatch_without_handlers_is_noop() {
        let dispatcher = Dispatcher::new(&Config::default());
        let outcome = dispatcher
            .dispatch_new(&[sample_listing("https://example.com/d/1")])
            .await;
        assert_eq!(outcome.dispatched, 0);
    }
}
