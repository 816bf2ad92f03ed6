//! Pagination Engine: detect a site's pagination shape and advance through it.
//!
//! Follows a link-discovery loop shape (extract → filter → enqueue, with a
//! visited-set dedup) combined with driving a live `Page` through a handful
//! of DOM probes in a fixed priority order. The four strategies below
//! replace "discover links to crawl" with "detect + advance a pager", kept
//! to a detect-then-act shape with a jittered inter-step sleep.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PaginationConfig;
use crate::utils::constants::{PAGINATION_ADVANCE_DELAY_MS, PAGINATION_EMPTY_PAGE_STOP};

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("browser error while paginating: {0}")]
    Browser(String),
    #[error("pagination advanced but yielded identical content for {0} consecutive steps")]
    StaleContent(u32),
    #[error("cancellation observed after {0} completed pages")]
    Cancelled(u32),
}

/// One page handed to the caller for extraction, with bookkeeping the engine
/// needs to decide whether to keep going.
pub struct PageHandle<'a> {
    pub page: &'a Page,
    pub page_number: u32,
}

/// A single pagination strategy: detect whether it applies, advance by one
/// step, and optionally report a known total.
#[async_trait]
pub trait PaginationStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn detect(&self, page: &Page) -> bool;
    async fn advance(&self, page: &Page) -> Result<bool, PaginationError>;
    async fn total_pages(&self, page: &Page) -> Option<u32>;
}

/// AJAX-driven pagination: `[data-ajax-pagination]` / `[data-page-url]` markers,
/// advanced by clicking the next-page trigger and waiting for the container
/// to change. Checked first.
pub struct AjaxStrategy;

#[async_trait]
impl PaginationStrategy for AjaxStrategy {
    fn name(&self) -> &'static str {
        "ajax"
    }

    async fn detect(&self, page: &Page) -> bool {
        for selector in ["[data-ajax-pagination]", "[data-page-url]"] {
            if page.find_element(selector).await.is_ok() {
                return true;
            }
        }
        false
    }

    async fn advance(&self, page: &Page) -> Result<bool, PaginationError> {
        let Ok(trigger) = page.find_element("[data-ajax-pagination] a, [data-page-url]").await else {
            return Ok(false);
        };
        let before = item_count(page).await;
        trigger.click().await.map_err(|e| PaginationError::Browser(e.to_string()))?;
        wait_for_count_change(page, before, Duration::from_secs(10)).await;
        let after = item_count(page).await;
        Ok(after != before)
    }

    async fn total_pages(&self, _page: &Page) -> Option<u32> {
        None
    }
}

/// Numbered pagination: `.pagination a`, `nav[aria-label*="pagination"] a`, or
/// `a[href*="page="]` links, advanced by clicking the next-highest page number.
pub struct NumberedStrategy;

const NUMBERED_SELECTORS: &[&str] = &[".pagination a", "nav[aria-label*=pagination] a", "a[href*='page=']"];

#[async_trait]
impl PaginationStrategy for NumberedStrategy {
    fn name(&self) -> &'static str {
        "numbered"
    }

    async fn detect(&self, page: &Page) -> bool {
        for selector in NUMBERED_SELECTORS {
            if let Ok(els) = page.find_elements(*selector).await
                && !els.is_empty()
            {
                return true;
            }
        }
        false
    }

    async fn advance(&self, page: &Page) -> Result<bool, PaginationError> {
        for selector in NUMBERED_SELECTORS {
            let Ok(links) = page.find_elements(*selector).await else {
                continue;
            };
            for link in links {
                let text = link.inner_text().await.ok().flatten().unwrap_or_default();
                let is_next = text.trim().eq_ignore_ascii_case("next")
                    || text.trim() == ">"
                    || text.trim() == "»";
                let is_active_neighbor = link
                    .attribute("class")
                    .await
                    .ok()
                    .flatten()
                    .is_some_and(|c| !c.contains("active") && !c.contains("current"));
                if is_next || is_active_neighbor {
                    link.click().await.map_err(|e| PaginationError::Browser(e.to_string()))?;
                    let _ = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn total_pages(&self, page: &Page) -> Option<u32> {
        let mut max_page = None;
        for selector in NUMBERED_SELECTORS {
            let Ok(links) = page.find_elements(*selector).await else {
                continue;
            };
            for link in links {
                if let Ok(Some(text)) = link.inner_text().await
                    && let Ok(n) = text.trim().parse::<u32>()
                {
                    max_page = Some(max_page.map_or(n, |m: u32| m.max(n)));
                }
            }
        }
        max_page
    }
}

/// "Load more" buttons matching `/(load|show|view) more/i`, advanced by click
/// and detected as successful via item-count comparison rather than button
/// state, since some sites leave the button visible after the last page.
pub struct LoadMoreStrategy;

static LOAD_MORE_PATTERN: once_cell::sync::Lazy<regex::Regex> =
    once_cell::sync::Lazy::new(|| regex::Regex::new(r"(?i)(load|show|view)\s*more").expect("static regex is valid"));

#[async_trait]
impl PaginationStrategy for LoadMoreStrategy {
    fn name(&self) -> &'static str {
        "load_more"
    }

    async fn detect(&self, page: &Page) -> bool {
        find_load_more_button(page).await.is_some()
    }

    async fn advance(&self, page: &Page) -> Result<bool, PaginationError> {
        let Some(button) = find_load_more_button(page).await else {
            return Ok(false);
        };
        let before = item_count(page).await;
        button.click().await.map_err(|e| PaginationError::Browser(e.to_string()))?;
        wait_for_count_change(page, before, Duration::from_secs(10)).await;
        let after = item_count(page).await;
        Ok(after > before)
    }

    async fn total_pages(&self, _page: &Page) -> Option<u32> {
        None
    }
}

async fn find_load_more_button(page: &Page) -> Option<chromiumoxide::element::Element> {
    let buttons = page.find_elements("button, a").await.ok()?;
    for button in buttons {
        if let Ok(Some(text)) = button.inner_text().await
            && LOAD_MORE_PATTERN.is_match(&text)
        {
            return Some(button);
        }
    }
    None
}

/// Infinite scroll, detected via `[data-infinite-scroll]` or a growing
/// `document.body.scrollHeight`, advanced by scrolling to the bottom and
/// waiting up to 10s for new content or a loading indicator to disappear.
pub struct InfiniteScrollStrategy;

#[async_trait]
impl PaginationStrategy for InfiniteScrollStrategy {
    fn name(&self) -> &'static str {
        "infinite_scroll"
    }

    async fn detect(&self, page: &Page) -> bool {
        page.find_element("[data-infinite-scroll]").await.is_ok()
    }

    async fn advance(&self, page: &Page) -> Result<bool, PaginationError> {
        let before_height = scroll_height(page).await;
        page.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(|e| PaginationError::Browser(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let after_height = scroll_height(page).await;
            if after_height > before_height {
                return Ok(true);
            }
            if page.find_element("[data-loading], .loading, .spinner").await.is_err() {
                return Ok(after_height > before_height);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    async fn total_pages(&self, _page: &Page) -> Option<u32> {
        None
    }
}

async fn scroll_height(page: &Page) -> i64 {
    page.evaluate("document.body.scrollHeight")
        .await
        .ok()
        .and_then(|v| v.into_value::<i64>().ok())
        .unwrap_or(0)
}

async fn item_count(page: &Page) -> usize {
    page.find_elements("[data-opportunity], .opportunity, .tender, .result-item")
        .await
        .map(|els| els.len())
        .unwrap_or(0)
}

async fn wait_for_count_change(page: &Page, before: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if item_count(page).await != before {
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Outcome of one full pagination run, recorded into `Job.stats`.
#[derive(Debug, Default, Clone)]
pub struct PaginationStats {
    pub pages: u32,
    pub stopped_reason: &'static str,
}

/// One callback invocation's result: how many opportunities were extracted
/// from the current page, and a content fingerprint used to detect advances
/// that yield identical content three times in a row.
pub struct PageOutcome {
    pub item_count: usize,
    pub content_fingerprint: u64,
}

pub struct PaginationEngine {
    strategies: Vec<Box<dyn PaginationStrategy>>,
}

impl Default for PaginationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PaginationEngine {
    /// Strategies in priority order: AJAX first, then numbered, then
    /// load-more, then infinite scroll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(AjaxStrategy),
                Box::new(NumberedStrategy),
                Box::new(LoadMoreStrategy),
                Box::new(InfiniteScrollStrategy),
            ],
        }
    }

    async fn detect(&self, page: &Page) -> Option<&dyn PaginationStrategy> {
        for strategy in &self.strategies {
            if strategy.detect(page).await {
                debug!(strategy = strategy.name(), "pagination strategy detected");
                return Some(strategy.as_ref());
            }
        }
        None
    }

    /// Drive `page` through every strategy step, calling `on_page` once per
    /// page for extraction. Stops on: total pages reached, `max_pages`,
    /// 3 consecutive empty pages, a revisited URL, or 3 consecutive
    /// identical-content advances.
    pub async fn run<F, Fut>(
        &self,
        page: &Page,
        config: &PaginationConfig,
        mut on_page: F,
    ) -> Result<PaginationStats, PaginationError>
    where
        F: FnMut(PageHandle<'_>) -> Fut,
        Fut: std::future::Future<Output = Result<PageOutcome, PaginationError>>,
    {
        let max_pages = config.max_pages.unwrap_or(50);
        let mut seen_urls = HashSet::new();
        let mut consecutive_empty = 0u32;
        let mut consecutive_stale = 0u32;
        let mut last_fingerprint: Option<u64> = None;
        let mut page_number = 1u32;

        let strategy = self.detect(page).await;
        let total_pages = match strategy {
            Some(s) => s.total_pages(page).await,
            None => None,
        };

        loop {
            if let Ok(Some(url)) = page.url().await
                && !seen_urls.insert(url.clone())
            {
                info!(url, "pagination revisited a seen URL, stopping");
                return Ok(stats(page_number, "url_revisited"));
            }

            let outcome = on_page(PageHandle { page, page_number }).await?;
            if outcome.item_count == 0 {
                consecutive_empty += 1;
            } else {
                consecutive_empty = 0;
            }
            if last_fingerprint == Some(outcome.content_fingerprint) {
                consecutive_stale += 1;
            } else {
                consecutive_stale = 0;
            }
            last_fingerprint = Some(outcome.content_fingerprint);

            if consecutive_stale >= PAGINATION_EMPTY_PAGE_STOP {
                return Err(PaginationError::StaleContent(consecutive_stale));
            }
            if consecutive_empty >= PAGINATION_EMPTY_PAGE_STOP {
                return Ok(stats(page_number, "consecutive_empty_pages"));
            }
            if let Some(total) = total_pages
                && page_number >= total
            {
                return Ok(stats(page_number, "total_pages_reached"));
            }
            if page_number >= max_pages {
                return Ok(stats(page_number, "max_pages_reached"));
            }

            let Some(strategy) = strategy else {
                return Ok(stats(page_number, "no_pagination_detected"));
            };

            jittered_sleep().await;
            match strategy.advance(page).await {
                Ok(true) => page_number += 1,
                Ok(false) => return Ok(stats(page_number, "advance_exhausted")),
                Err(e) => {
                    warn!(error = %e, "pagination advance failed");
                    return Err(e);
                }
            }
        }
    }
}

fn stats(pages: u32, reason: &'static str) -> PaginationStats {
    PaginationStats {
        pages,
        stopped_reason: reason,
    }
}

async fn jittered_sleep() {
    let (lo, hi) = PAGINATION_ADVANCE_DELAY_MS;
    let ms = rand::rng().random_range(lo..=hi);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pure termination-logic check: any run halts in <= max_pages
    /// iterations or after 3 consecutive empty pages, whichever comes
    /// first, without needing a live browser.
    fn simulate(max_pages: u32, item_counts: &[usize]) -> (u32, &'static str) {
        let mut consecutive_empty = 0u32;
        for (i, &count) in item_counts.iter().enumerate() {
            let page_number = i as u32 + 1;
            if count == 0 {
                consecutive_empty += 1;
            } else {
                consecutive_empty = 0;
            }
            if consecutive_empty >= PAGINATION_EMPTY_PAGE_STOP {
                return (page_number, "consecutive_empty_pages");
            }
            if page_number >= max_pages {
                return (page_number, "max_pages_reached");
            }
        }
        (item_counts.len() as u32, "exhausted_input")
    }

    #[test]
    fn halts_after_three_consecutive_empty_pages() {
        let (pages, reason) = simulate(50, &[10, 10, 0, 0, 0, 10]);
        assert_eq!(pages, 5);
        assert_eq!(reason, "consecutive_empty_pages");
    }

    #[test]
    fn halts_at_max_pages_when_never_empty() {
        let (pages, reason) = simulate(3, &[10, 10, 10, 10, 10]);
        assert_eq!(pages, 3);
        assert_eq!(reason, "max_pages_reached");
    }

    #[test]
    fn load_more_pattern_matches_common_phrasings() {
        assert!(LOAD_MORE_PATTERN.is_match("Load More"));
        assert!(LOAD_MORE_PATTERN.is_match("show more results"));
        assert!(LOAD_MORE_PATTERN.is_match("View More"));
        assert!(!LOAD_MORE_PATTERN.is_match("Submit"));
    }
}
