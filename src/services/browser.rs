// src/services/browser.rs

//! Feed materialization.
//!
//! Drives a headless Chromium session to the feed URL, waits for the
//! page to settle, then scrolls incrementally until the lazy-loaded
//! feed stops growing, the iteration cap is hit, or (in smart-stop
//! mode) a previously-seen listing scrolls into view. Returns the final
//! rendered markup snapshot.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::watch;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::utils::url::canonical_key;

/// Produces the rendered feed markup for one run.
///
/// The pipeline depends on this seam rather than on the concrete
/// browser session, so tests can substitute canned markup.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(
        &self,
        feed_url: &str,
        known_links: &HashSet<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<String>;
}

/// Why the scroll loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollVerdict {
    /// Keep scrolling
    Continue,
    /// Rendered count unchanged across two consecutive iterations
    CountSettled,
    /// Configured iteration cap reached
    IterationCapped,
    /// Smart stop: the newest rendered listing is already known
    KnownLinkReached,
}

/// Pure bookkeeping for the incremental scroll loop, separated from the
/// browser session so termination rules are testable on their own.
#[derive(Debug)]
pub struct ScrollProgress {
    max_iterations: usize,
    iterations: usize,
    last_count: Option<usize>,
}

impl ScrollProgress {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            iterations: 0,
            last_count: None,
        }
    }

    /// Record one iteration's observations and decide whether to keep
    /// going. `newest_link` is the most recently rendered listing link,
    /// when smart stop is active.
    pub fn observe(
        &mut self,
        count: usize,
        newest_link: Option<&str>,
        known_links: &HashSet<String>,
    ) -> ScrollVerdict {
        self.iterations += 1;

        if let Some(link) = newest_link {
            if known_links.contains(&canonical_key(link)) {
                return ScrollVerdict::KnownLinkReached;
            }
        }

        if self.last_count == Some(count) {
            return ScrollVerdict::CountSettled;
        }
        self.last_count = Some(count);

        if self.iterations >= self.max_iterations {
            return ScrollVerdict::IterationCapped;
        }
        ScrollVerdict::Continue
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Rendering session for the listing feed.
pub struct FeedBrowser {
    config: Arc<Config>,
}

#[async_trait]
impl Materializer for FeedBrowser {
    /// Materialize the feed: navigate, settle, scroll until done, and
    /// return the final markup.
    ///
    /// `known_links` feeds the smart-stop check (empty disables it); a
    /// shutdown signal aborts the wait loop promptly and fails the run.
    async fn materialize(
        &self,
        feed_url: &str,
        known_links: &HashSet<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<String> {
        if *shutdown.borrow() {
            return Err(AppError::fetch(feed_url, "shutdown before navigation"));
        }

        let browser_config = self.build_browser_config()?;
        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AppError::fetch(feed_url, format!("browser launch failed: {e}")))?;

        // The CDP handler must be polled for the session to make progress.
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.drive(&browser, feed_url, known_links, shutdown).await;

        if let Err(e) = browser.close().await {
            log::debug!("Browser close failed: {e}");
        }
        let _ = handle.await;

        result
    }
}

impl FeedBrowser {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    fn build_browser_config(&self) -> Result<BrowserConfig> {
        let browser = &self.config.browser;
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", browser.user_agent))
            .arg("--lang=de-DE")
            .window_size(1920, 1080);

        if !browser.headless {
            builder = builder.with_head();
        }

        builder
            .build()
            .map_err(|e| AppError::config(format!("browser config: {e}")))
    }

    async fn drive(
        &self,
        browser: &Browser,
        feed_url: &str,
        known_links: &HashSet<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<String> {
        let browser_cfg = &self.config.browser;
        let nav_timeout = Duration::from_secs(browser_cfg.nav_timeout_secs);

        log::info!("Loading feed: {feed_url}");
        let page = tokio::time::timeout(nav_timeout, browser.new_page(feed_url))
            .await
            .map_err(|_| AppError::fetch(feed_url, "navigation timed out"))?
            .map_err(|e| AppError::fetch(feed_url, e))?;

        tokio::time::timeout(nav_timeout, page.wait_for_navigation())
            .await
            .map_err(|_| AppError::fetch(feed_url, "initial load timed out"))?
            .map_err(|e| AppError::fetch(feed_url, e))?;

        // Let in-flight requests drain before the first count.
        self.settle(Duration::from_millis(browser_cfg.initial_settle_ms), feed_url, shutdown)
            .await?;

        let smart_stop = self.config.scheduler.smart_stop && !known_links.is_empty();
        let mut progress = ScrollProgress::new(browser_cfg.max_scroll_iterations);
        let settle = Duration::from_millis(browser_cfg.scroll_settle_ms);

        loop {
            self.scroll_to_bottom(&page, feed_url).await?;
            self.settle(settle, feed_url, shutdown).await?;

            let newest = if smart_stop {
                self.newest_listing_href(&page, feed_url).await?
            } else {
                None
            };
            let count = self.rendered_count(&page, feed_url).await?;

            match progress.observe(count, newest.as_deref(), known_links) {
                ScrollVerdict::Continue => {
                    log::debug!("Scroll {}: {count} rendered listings", progress.iterations());
                }
                ScrollVerdict::CountSettled => {
                    log::info!(
                        "Feed settled at {count} listings after {} scrolls",
                        progress.iterations()
                    );
                    break;
                }
                ScrollVerdict::IterationCapped => {
                    log::warn!(
                        "Reached scroll iteration cap ({}) with {count} listings",
                        browser_cfg.max_scroll_iterations
                    );
                    break;
                }
                ScrollVerdict::KnownLinkReached => {
                    log::info!(
                        "Smart stop after {} scrolls: reached a known listing",
                        progress.iterations()
                    );
                    break;
                }
            }
        }

        let html = page
            .content()
            .await
            .map_err(|e| AppError::fetch(feed_url, e))?;
        log::info!("Materialized feed markup: {} bytes", html.len());
        Ok(html)
    }

    /// Sleep for the settle window, aborting promptly on shutdown.
    async fn settle(
        &self,
        window: Duration,
        feed_url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(window) => Ok(()),
            _ = shutdown.changed() => {
                Err(AppError::fetch(feed_url, "shutdown during materialization"))
            }
        }
    }

    async fn scroll_to_bottom(&self, page: &Page, feed_url: &str) -> Result<()> {
        page.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(|e| AppError::fetch(feed_url, e))?;
        Ok(())
    }

    async fn rendered_count(&self, page: &Page, feed_url: &str) -> Result<usize> {
        let js = format!(
            r#"document.querySelectorAll('a[href*="{}"]').length"#,
            self.config.extract.listing_path_marker
        );
        let count: u64 = page
            .evaluate(js)
            .await
            .map_err(|e| AppError::fetch(feed_url, e))?
            .into_value()
            .map_err(|e| AppError::fetch(feed_url, e))?;
        Ok(count as usize)
    }

    /// Href of the most recently rendered listing anchor, if any.
    async fn newest_listing_href(&self, page: &Page, feed_url: &str) -> Result<Option<String>> {
        let js = format!(
            r#"(() => {{
                const anchors = document.querySelectorAll('a[href*="{}"]');
                return anchors.length ? anchors[anchors.length - 1].href : null;
            }})()"#,
            self.config.extract.listing_path_marker
        );
        let href: Option<String> = page
            .evaluate(js)
            .await
            .map_err(|e| AppError::fetch(feed_url, e))?
            .into_value()
            .map_err(|e| AppError::fetch(feed_url, e))?;
        Ok(href)
    }
}
