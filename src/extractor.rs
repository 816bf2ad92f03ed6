//! Extractor: turn a rendered page into `Opportunity` records via an
//! injectable LLM capability, falling back to configured CSS selectors.
//!
//! Follows a pattern of fixed prompt/script constants paired with a thin
//! driving function, and `scraper`-based DOM querying with a
//! `Selector::parse` plus a `once_cell` static for each compiled pattern.

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SelectorsConfig;
use crate::models::Opportunity;
use crate::utils::constants::{EXTRACTOR_MAX_PROMPT_CHARS, MISSING_FIELD_CONFIDENCE_PENALTY};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("neither LLM nor selector mode yielded any parseable opportunity")]
    ExtractionFailed,
    #[error("LLM backend error: {0}")]
    Llm(String),
}

/// Injectable LLM capability: a single `complete(prompt) -> text` operation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Chat-completions-shaped `LlmClient` talking to the configured `llm_endpoint`.
/// The LLM backend itself is treated as a black-box extractor; this is just
/// the thin HTTP plumbing an injectable capability needs to exist as
/// something other than a trait.
pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    /// Low-temperature (<=0.1) chat-completion call.
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let mut request = self.http.post(&self.endpoint).json(&serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "messages": [{ "role": "user", "content": prompt }],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("LLM response missing choices[0].message.content"))
    }
}

/// Output of one `Extractor::run` call.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub opportunities: Vec<Opportunity>,
    pub document_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LlmOpportunity {
    title: Option<String>,
    /// Direct link to the opportunity's detail page; becomes `source_url`.
    source_url: Option<String>,
    reference: Option<String>,
    deadline: Option<String>,
    value: Option<String>,
    currency: Option<String>,
    description: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    location: Option<String>,
    #[serde(default)]
    document_urls: Vec<String>,
}

static SCRIPT_OR_STYLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</\1>").expect("static regex is valid"));

const EXTRACTION_PROMPT_PREAMBLE: &str = "You are extracting tender/grant opportunities from a web page. \
Respond with a JSON array only, no prose. Each element must have these fields: \
title, source_url (direct link to the opportunity's own detail page, absolute URL), \
reference, deadline (ISO-8601 or null), value, currency, description, categories (array), \
location, document_urls (array of absolute URLs). Every element needs its own distinct source_url; \
do not reuse the page URL for all items. Omit any field you cannot find rather than guessing.\n\n\
PAGE CONTENT:\n";

pub struct Extractor {
    llm: Option<Box<dyn LlmClient>>,
}

impl Extractor {
    #[must_use]
    pub fn new(llm: Option<Box<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// Run both modes in priority order: LLM first when configured, falling
    /// back to selectors on absence or invalid JSON.
    pub async fn run(
        &self,
        html: &str,
        page_url: &str,
        site_id: Uuid,
        selectors: &SelectorsConfig,
    ) -> Result<ExtractedPage, ExtractionError> {
        if let Some(llm) = &self.llm {
            match self.run_llm(llm.as_ref(), html, page_url, site_id).await {
                Ok(page) if !page.opportunities.is_empty() => return Ok(page),
                Ok(_) => debug!("LLM mode returned zero opportunities, falling back to selectors"),
                Err(e) => warn!(error = %e, "LLM extraction failed, falling back to selectors"),
            }
        }

        let page = self.run_selectors(html, page_url, site_id, selectors);
        if page.opportunities.is_empty() && page.document_urls.is_empty() {
            return Err(ExtractionError::ExtractionFailed);
        }
        Ok(page)
    }

    async fn run_llm(
        &self,
        llm: &dyn LlmClient,
        html: &str,
        page_url: &str,
        site_id: Uuid,
    ) -> Result<ExtractedPage, ExtractionError> {
        let stripped = strip_script_and_style(html);
        let truncated = crate::utils::string_utils::safe_truncate_chars(&stripped, EXTRACTOR_MAX_PROMPT_CHARS);
        let prompt = format!("{EXTRACTION_PROMPT_PREAMBLE}{truncated}");

        let text = llm.complete(&prompt).await.map_err(|e| ExtractionError::Llm(e.to_string()))?;
        let parsed: Vec<LlmOpportunity> =
            serde_json::from_str(text.trim()).map_err(|e| ExtractionError::Llm(format!("invalid JSON from LLM: {e}")))?;

        let mut document_urls = Vec::new();
        let opportunities = parsed
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| {
                document_urls.extend(raw.document_urls.iter().cloned());
                let source_url = match raw.source_url.as_deref().filter(|s| !s.trim().is_empty()) {
                    Some(url) => resolve_url(page_url, url),
                    None => {
                        warn!(page_url, index, "LLM item missing source_url, synthesizing a per-item fallback");
                        format!("{page_url}#llm-item-{index}")
                    }
                };
                build_opportunity(
                    site_id,
                    raw.title,
                    raw.description,
                    raw.deadline,
                    raw.value,
                    raw.currency,
                    raw.reference,
                    Some(source_url),
                    raw.categories,
                    raw.location,
                )
            })
            .collect::<Vec<_>>();

        Ok(dedup_by_source_url(ExtractedPage {
            opportunities,
            document_urls,
        }))
    }

    fn run_selectors(&self, html: &str, page_url: &str, site_id: Uuid, selectors: &SelectorsConfig) -> ExtractedPage {
        let document = Html::parse_document(html);
        let mut opportunities = Vec::new();
        let mut document_urls = Vec::new();

        let Some(container_selector) = selectors.opportunity_container.as_deref().and_then(|s| Selector::parse(s).ok())
        else {
            warn!("selector mode has no valid opportunity_container selector configured");
            return ExtractedPage::default();
        };

        let link_selector = selectors.link.as_deref().and_then(|s| Selector::parse(s).ok());
        if selectors.link.is_some() && link_selector.is_none() {
            warn!(selector = selectors.link.as_deref(), "invalid link selector configured, falling back to page_url");
        }

        for (index, container) in document.select(&container_selector).enumerate() {
            let title = select_text(&container, selectors.title.as_deref());
            let description = select_text(&container, selectors.description.as_deref());
            let deadline = select_text(&container, selectors.deadline.as_deref());
            let value = select_text(&container, selectors.value.as_deref());
            let reference = select_text(&container, selectors.reference_number.as_deref());

            if let Some(docs_selector) = selectors.documents.as_deref().and_then(|s| Selector::parse(s).ok()) {
                for el in container.select(&docs_selector) {
                    if let Some(href) = el.value().attr("href") {
                        document_urls.push(resolve_url(page_url, href));
                    }
                }
            }

            let source_url = link_selector
                .as_ref()
                .and_then(|sel| container.select(sel).next())
                .and_then(|el| el.value().attr("href"))
                .map(|href| resolve_url(page_url, href))
                .unwrap_or_else(|| {
                    warn!(page_url, index, "container has no detail link, synthesizing a per-item fallback");
                    format!("{page_url}#item-{index}")
                });

            if let Some(opp) = build_opportunity(
                site_id,
                title,
                description,
                deadline,
                value,
                None,
                reference,
                Some(source_url),
                Vec::new(),
                None,
            ) {
                opportunities.push(opp);
            }
        }

        dedup_by_source_url(ExtractedPage {
            opportunities,
            document_urls,
        })
    }
}

fn select_text(container: &scraper::ElementRef<'_>, selector: Option<&str>) -> Option<String> {
    let selector = Selector::parse(selector?).ok()?;
    container
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn strip_script_and_style(html: &str) -> String {
    let without_script_style = SCRIPT_OR_STYLE_TAG.replace_all(html, "");
    let document = Html::parse_document(&without_script_style);
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

#[allow(clippy::too_many_arguments)]
fn build_opportunity(
    site_id: Uuid,
    title: Option<String>,
    description: Option<String>,
    deadline_raw: Option<String>,
    value_raw: Option<String>,
    currency_raw: Option<String>,
    reference: Option<String>,
    source_url: Option<String>,
    categories: Vec<String>,
    location: Option<String>,
) -> Option<Opportunity> {
    let title = title.filter(|t| !t.trim().is_empty())?;
    let deadline = deadline_raw.as_deref().and_then(parse_deadline);
    let value = value_raw.as_deref().and_then(parse_value);
    let currency = currency_raw
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| Opportunity::DEFAULT_CURRENCY.to_string());

    let mut confidence = 1.0;
    if deadline.is_none() {
        confidence *= MISSING_FIELD_CONFIDENCE_PENALTY;
    }
    if description.as_deref().map(str::trim).unwrap_or("").is_empty() {
        confidence *= MISSING_FIELD_CONFIDENCE_PENALTY;
    }

    let now = chrono::Utc::now();
    Some(Opportunity {
        id: Uuid::new_v4(),
        site_id,
        title,
        description,
        deadline,
        value,
        currency,
        reference_number: reference,
        source_url: source_url.unwrap_or_default(),
        categories,
        location,
        extracted_payload: serde_json::Value::Null,
        confidence,
        created_at: now,
        updated_at: now,
    })
}

static THOUSANDS_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,\s]").expect("static regex is valid"));
static CURRENCY_SYMBOLS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^[^0-9.]*").expect("static regex is valid"));
static TRAILING_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([KMB])\s*$").expect("static regex is valid"));

/// Parse strings like `"$1.2M"` or `"USD 500,000"` into a `Decimal`.
fn parse_value(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_symbol = CURRENCY_SYMBOLS.replace(trimmed, "");
    let suffix = TRAILING_SUFFIX
        .captures(&without_symbol)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase());
    let numeric_part = TRAILING_SUFFIX.replace(&without_symbol, "");
    let cleaned = THOUSANDS_SEP.replace_all(numeric_part.trim(), "");

    let base: Decimal = cleaned.parse().ok()?;
    let multiplier = match suffix.as_deref() {
        Some("K") => Decimal::from(1_000),
        Some("M") => Decimal::from(1_000_000),
        Some("B") => Decimal::from(1_000_000_000),
        _ => Decimal::from(1),
    };
    Some(base * multiplier)
}

/// Parse a deadline leniently across a handful of common formats; `None`
/// rather than a guess on failure.
fn parse_deadline(raw: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&chrono::Utc));
    }
    const FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%d %B %Y"];
    for fmt in FORMATS {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

fn resolve_url(base: &str, href: &str) -> String {
    url::Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

fn dedup_by_source_url(mut page: ExtractedPage) -> ExtractedPage {
    let mut seen = HashSet::new();
    page.opportunities.retain(|o| seen.insert(o.source_url.clone()));
    page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_value_handles_dollar_million_suffix() {
        assert_eq!(parse_value("$1.2M"), Some(Decimal::new(12, 1) * Decimal::from(1_000_000)));
    }

    #[test]
    fn parse_value_handles_currency_prefix_and_thousands_separators() {
        assert_eq!(parse_value("USD 500,000"), Some(Decimal::from(500_000)));
    }

    #[test]
    fn parse_value_returns_none_for_garbage() {
        assert_eq!(parse_value("tbd"), None);
    }

    #[test]
    fn parse_deadline_accepts_iso8601() {
        assert!(parse_deadline("2026-08-15T00:00:00Z").is_some());
    }

    #[test]
    fn parse_deadline_returns_none_rather_than_guessing() {
        assert_eq!(parse_deadline("sometime next quarter"), None);
    }

    #[test]
    fn build_opportunity_drops_items_with_no_title() {
        let opp = build_opportunity(
            Uuid::new_v4(),
            None,
            Some("desc".into()),
            None,
            None,
            None,
            None,
            Some("https://example.com/a".into()),
            Vec::new(),
            None,
        );
        assert!(opp.is_none());
    }

    #[test]
    fn build_opportunity_penalizes_missing_deadline_and_description() {
        let opp = build_opportunity(
            Uuid::new_v4(),
            Some("Road Resurfacing Tender".into()),
            None,
            None,
            None,
            None,
            None,
            Some("https://example.com/a".into()),
            Vec::new(),
            None,
        )
        .unwrap();
        assert!((opp.confidence - MISSING_FIELD_CONFIDENCE_PENALTY.powi(2)).abs() < 1e-9);
    }

    #[test]
    fn dedup_by_source_url_keeps_first_occurrence() {
        let site_id = Uuid::new_v4();
        let a = build_opportunity(
            site_id,
            Some("A".into()),
            Some("d".into()),
            None,
            None,
            None,
            None,
            Some("https://example.com/dup".into()),
            Vec::new(),
            None,
        )
        .unwrap();
        let b = build_opportunity(
            site_id,
            Some("B".into()),
            Some("d".into()),
            None,
            None,
            None,
            None,
            Some("https://example.com/dup".into()),
            Vec::new(),
            None,
        )
        .unwrap();
        let page = dedup_by_source_url(ExtractedPage {
            opportunities: vec![a, b],
            document_urls: Vec::new(),
        });
        assert_eq!(page.opportunities.len(), 1);
        assert_eq!(page.opportunities[0].title, "A");
    }

    #[test]
    fn run_selectors_derives_distinct_source_url_per_item() {
        let html = r#"
            <div class="tender">
                <h2 class="title">Road Resurfacing</h2>
                <a class="link" href="/tenders/1">details</a>
            </div>
            <div class="tender">
                <h2 class="title">Bridge Repair</h2>
                <a class="link" href="/tenders/2">details</a>
            </div>
        "#;
        let selectors = SelectorsConfig {
            opportunity_container: Some(".tender".into()),
            title: Some(".title".into()),
            link: Some(".link".into()),
            ..Default::default()
        };
        let extractor = Extractor::new(None);
        let page = extractor.run_selectors(html, "https://example.com/page", Uuid::new_v4(), &selectors);

        assert_eq!(page.opportunities.len(), 2);
        let urls: HashSet<_> = page.opportunities.iter().map(|o| o.source_url.clone()).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls.contains("https://example.com/tenders/1"));
        assert!(urls.contains("https://example.com/tenders/2"));
    }

    #[test]
    fn run_selectors_synthesizes_fallback_when_link_missing() {
        let html = r#"
            <div class="tender"><h2 class="title">A</h2></div>
            <div class="tender"><h2 class="title">B</h2></div>
        "#;
        let selectors = SelectorsConfig {
            opportunity_container: Some(".tender".into()),
            title: Some(".title".into()),
            ..Default::default()
        };
        let extractor = Extractor::new(None);
        let page = extractor.run_selectors(html, "https://example.com/page", Uuid::new_v4(), &selectors);

        assert_eq!(page.opportunities.len(), 2);
        let urls: HashSet<_> = page.opportunities.iter().map(|o| o.source_url.clone()).collect();
        assert_eq!(urls.len(), 2, "each item without a link must still get a distinct source_url");
    }
}
