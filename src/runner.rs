//! Scrape Runner: composes every other component to execute one Job end to end.
//!
//! Opens a browser context, drives it through a sequence of named phases,
//! and translates any phase failure into a single outer error the caller
//! retries or gives up on. Unlike a page-level retry loop, the unit of
//! retry here is a whole Job, handled through the Job Queue rather than
//! inline.

use std::collections::HashMap;
use std::sync::Arc;

use chromiumoxide::browser::Browser;
use chromiumoxide_cdp::cdp::browser_protocol::network::CookieParam;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::auth::AuthEngine;
use crate::browser_setup::BrowserIdentity;
use crate::compliance::{ComplianceError, ComplianceGate};
use crate::config::SiteConfig;
use crate::documents::DocumentProcessor;
use crate::error::{retry_backoff, ScrapeError};
use crate::extractor::Extractor;
use crate::models::credential::PlaintextCredentials;
use crate::models::{AuthType, Job, Opportunity, Site};
use crate::pagination::{PageOutcome, PaginationEngine};
use crate::queue::JobQueue;
use crate::rate_limiter::RateLimiter;
use crate::session_store::SessionStore;
use crate::vault::Vault;

/// Schema for the entities a run persists. `opportunities` is upserted on
/// `source_url`, the whole point of the final single-transaction persist.
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS sites (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    category TEXT,
    auth_type TEXT NOT NULL DEFAULT 'none',
    encrypted_credentials BYTEA,
    scraping_config JSONB NOT NULL DEFAULT '{}'::jsonb,
    active BOOLEAN NOT NULL DEFAULT true,
    legal_blocked BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS opportunities (
    id UUID PRIMARY KEY,
    site_id UUID NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT,
    deadline TIMESTAMPTZ,
    value NUMERIC,
    currency TEXT NOT NULL DEFAULT 'USD',
    reference_number TEXT,
    source_url TEXT NOT NULL UNIQUE,
    categories TEXT[] NOT NULL DEFAULT '{}',
    location TEXT,
    extracted_payload JSONB NOT NULL DEFAULT 'null'::jsonb,
    confidence DOUBLE PRECISION NOT NULL DEFAULT 1.0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS documents (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    opportunity_id UUID NOT NULL REFERENCES opportunities(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    object_key TEXT NOT NULL UNIQUE,
    size_bytes BIGINT NOT NULL,
    mime_type TEXT NOT NULL,
    extracted_text TEXT,
    extracted_payload JSONB,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
";

/// Outcome of one successful run, folded into `Job.stats`.
#[derive(Debug, Default, serde::Serialize)]
pub struct RunStats {
    pub pages: u32,
    pub items: usize,
    pub pdfs: usize,
}

/// How a run ended: either it ran the pagination loop to its natural stop
/// condition, or it observed `cancel_requested` at a page boundary and
/// stopped early without persisting anything.
enum RunOutcome {
    Completed(RunStats),
    Cancelled(RunStats),
}

pub struct ScrapeRunner {
    pool: PgPool,
    queue: JobQueue,
    vault: Arc<Vault>,
    compliance: Arc<ComplianceGate>,
    rate_limiter: Arc<RateLimiter>,
    session_store: SessionStore,
    auth_engine: Arc<AuthEngine>,
    pagination: PaginationEngine,
    extractor: Arc<Extractor>,
    documents: Arc<DocumentProcessor>,
}

impl ScrapeRunner {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        pool: PgPool,
        queue: JobQueue,
        vault: Arc<Vault>,
        compliance: Arc<ComplianceGate>,
        rate_limiter: Arc<RateLimiter>,
        session_store: SessionStore,
        auth_engine: Arc<AuthEngine>,
        extractor: Arc<Extractor>,
        documents: Arc<DocumentProcessor>,
    ) -> Self {
        Self {
            pool,
            queue,
            vault,
            compliance,
            rate_limiter,
            session_store,
            auth_engine,
            pagination: PaginationEngine::new(),
            extractor,
            documents,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Run one claimed Job end to end, translating any failure
    /// into either a terminal `failed` status or a backoff re-enqueue, and
    /// never propagating the error past this call — the Worker Pool only
    /// needs to know the outcome was recorded.
    #[instrument(skip_all, fields(job_id = %job.id, site_id = %job.site_id))]
    pub async fn run_job(&self, job: &Job, browser: &Browser, identity: BrowserIdentity) {
        let start = std::time::Instant::now();
        match self.execute(job, browser, identity).await {
            Ok(RunOutcome::Completed(stats)) => {
                info!(pages = stats.pages, items = stats.items, pdfs = stats.pdfs, "job completed");
                let stats_json = serde_json::json!({
                    "pages": stats.pages,
                    "items": stats.items,
                    "pdfs": stats.pdfs,
                    "duration_ms": start.elapsed().as_millis() as u64,
                });
                if let Err(e) = self.queue.complete(job.id, stats_json).await {
                    warn!(error = %e, "failed to record job completion");
                }
            }
            Ok(RunOutcome::Cancelled(stats)) => {
                info!(pages = stats.pages, "job cancelled mid-run");
                let stats_json = serde_json::json!({
                    "pages": stats.pages,
                    "items": stats.items,
                    "pdfs": stats.pdfs,
                    "duration_ms": start.elapsed().as_millis() as u64,
                });
                if let Err(e) = self.queue.finish_cancelled(job.id, stats_json).await {
                    warn!(error = %e, "failed to record job cancellation");
                }
            }
            Err(err) => self.record_failure(job, err).await,
        }
    }

    async fn record_failure(&self, job: &Job, err: ScrapeError) {
        let category = err.category();
        warn!(%category, error = %err, "job failed");

        if err.is_retryable() && job.retry_count < job.max_retries {
            let scheduled_at = chrono::Utc::now() + chrono::Duration::from_std(retry_backoff(job.retry_count as u32)).unwrap_or_default();
            if let Err(e) = self.queue.fail(job.id, &err.to_string(), Some(scheduled_at)).await {
                warn!(error = %e, "failed to re-enqueue job after retryable failure");
            }
        } else if let Err(e) = self.queue.fail(job.id, &err.to_string(), None).await {
            warn!(error = %e, "failed to record terminal job failure");
        }
    }

    async fn execute(&self, job: &Job, browser: &Browser, identity: BrowserIdentity) -> Result<RunOutcome, ScrapeError> {
        // Step 1: load Site and Credentials.
        let site = self.load_site(job.site_id).await?;
        let site_config = SiteConfig::from_json(&site.scraping_config).unwrap_or_default();
        let credentials = self.decrypt_credentials(&site)?;

        // Step 2: Compliance Gate.
        let verdict = self.compliance.check(&site.url).await?;
        if !verdict.allowed {
            self.mark_legal_blocked(site.id).await;
            return Err(ScrapeError::Compliance(ComplianceError::Violation {
                domain: verdict.domain,
                reason: verdict.required_precautions.join("; "),
            }));
        }
        let domain = verdict.domain.clone();

        // Step 3: browser context with stealth, session reuse or fresh auth.
        let page = browser.new_page("about:blank").await.map_err(|e| ScrapeError::Browser(e.to_string()))?;
        crate::browser_setup::apply_stealth_measures(&page, identity.user_agent)
            .await
            .map_err(|e| ScrapeError::AntiDetectionFailed(e.to_string()))?;

        if site.auth_type != AuthType::None {
            self.establish_session(&page, &site, &site_config, credentials.as_ref()).await?;
        }

        // Step 4: navigate to the start URL.
        let start_url = site_config.start_url.as_deref().unwrap_or(&site.url);
        page.goto(start_url).await.map_err(|e| ScrapeError::Browser(e.to_string()))?;
        let _ = page.wait_for_navigation().await;

        // Steps 5-6: pagination drives extraction; accumulate opportunities
        // and remember which page's first opportunity owns each document URL
        // (an Open Question the distilled spec leaves unresolved; resolution
        // recorded in DESIGN.md).
        let mut all_opportunities: Vec<Opportunity> = Vec::new();
        let mut doc_owner: HashMap<String, Uuid> = HashMap::new();
        let mut page_error: Option<ScrapeError> = None;

        let min_delay_ms = verdict
            .robots_crawl_delay_ms
            .unwrap_or_else(|| RateLimiter::default_min_delay_ms(&domain));

        let pagination_stats = self
            .pagination
            .run(&page, &site_config.pagination, |handle| {
                // Explicit reborrows: `on_page` is called repeatedly (`FnMut`), so
                // each invocation's `async move` block must capture a fresh `&mut`
                // into the outer owned locals rather than moving them outright.
                let page_error = &mut page_error;
                let doc_owner = &mut doc_owner;
                let all_opportunities = &mut all_opportunities;
                let domain = &domain;
                async move {
                    match self.queue.is_cancelled(job.id).await {
                        Ok(true) => {
                            return Err(crate::pagination::PaginationError::Cancelled(handle.page_number.saturating_sub(1)));
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "cancellation check failed, continuing the page"),
                    }

                    if let Err(e) = self.rate_limiter.acquire(domain, min_delay_ms).await {
                        *page_error = Some(ScrapeError::from(e));
                        return Err(crate::pagination::PaginationError::Browser("rate limit exceeded".into()));
                    }
                    if let Err(e) = self.compliance.assert_not_inverted(domain, true) {
                        *page_error = Some(ScrapeError::from(e));
                        return Err(crate::pagination::PaginationError::Browser("compliance inverted".into()));
                    }

                    let html = handle.page.content().await.unwrap_or_default();
                    let fingerprint = xxh3_64(html.as_bytes());
                    let current_url = handle.page.url().await.ok().flatten().unwrap_or_else(|| start_url.to_string());
                    let extracted = self.extractor.run(&html, &current_url, site.id, &site_config.selectors).await;

                    let extracted_page = match extracted {
                        Ok(p) => p,
                        Err(e) => {
                            warn!(error = %e, page_number = handle.page_number, "page extraction failed, treating as empty");
                            crate::extractor::ExtractedPage::default()
                        }
                    };

                    if let Some(owner) = extracted_page.opportunities.first().map(|o| o.id) {
                        for url in &extracted_page.document_urls {
                            doc_owner.entry(url.clone()).or_insert(owner);
                        }
                    } else if !extracted_page.document_urls.is_empty() {
                        warn!(page_number = handle.page_number, "documents found with no opportunity on the page, dropping to satisfy the document-needs-an-opportunity invariant");
                    }

                    let item_count = extracted_page.opportunities.len();
                    all_opportunities.extend(extracted_page.opportunities);

                    Ok(PageOutcome {
                        item_count,
                        content_fingerprint: fingerprint,
                    })
                }
            })
            .await;

        if let Err(crate::pagination::PaginationError::Cancelled(pages)) = &pagination_stats {
            let pages = *pages;
            info!(pages, "cancellation observed, stopping without persisting");
            return Ok(RunOutcome::Cancelled(RunStats { pages, items: 0, pdfs: 0 }));
        }
        if let Some(e) = page_error {
            return Err(e);
        }
        let pagination_stats = pagination_stats.map_err(|e| ScrapeError::Browser(e.to_string()))?;
        info!(reason = pagination_stats.stopped_reason, "pagination stopped");

        // Step 6: Document Processor over the deduplicated URL set.
        let doc_urls: Vec<String> = doc_owner.keys().cloned().collect();
        let processed_docs = self.documents.process_batch(&doc_urls).await;

        // Step 7: single-transaction persist, upserting Opportunities on source_url.
        let mut tx = self.pool.begin().await.map_err(ScrapeError::Database)?;
        for opp in &all_opportunities {
            sqlx::query(
                r"INSERT INTO opportunities
                    (id, site_id, title, description, deadline, value, currency, reference_number,
                     source_url, categories, location, extracted_payload, confidence, created_at, updated_at)
                  VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
                  ON CONFLICT (source_url) DO UPDATE SET
                    title = EXCLUDED.title, description = EXCLUDED.description, deadline = EXCLUDED.deadline,
                    value = EXCLUDED.value, currency = EXCLUDED.currency, reference_number = EXCLUDED.reference_number,
                    categories = EXCLUDED.categories, location = EXCLUDED.location,
                    extracted_payload = EXCLUDED.extracted_payload, confidence = EXCLUDED.confidence,
                    updated_at = EXCLUDED.updated_at",
            )
            .bind(opp.id)
            .bind(opp.site_id)
            .bind(&opp.title)
            .bind(&opp.description)
            .bind(opp.deadline)
            .bind(opp.value)
            .bind(&opp.currency)
            .bind(&opp.reference_number)
            .bind(&opp.source_url)
            .bind(&opp.categories)
            .bind(&opp.location)
            .bind(&opp.extracted_payload)
            .bind(opp.confidence)
            .bind(opp.created_at)
            .bind(opp.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(ScrapeError::Database)?;
        }

        let mut pdf_count = 0usize;
        for doc in processed_docs.iter().filter(|d| d.status == crate::models::DocumentStatus::Done) {
            let Some(&opportunity_id) = doc_owner.get(&doc.source_url) else {
                continue;
            };
            sqlx::query(
                r"INSERT INTO documents
                    (opportunity_id, filename, object_key, size_bytes, mime_type, extracted_text, extracted_payload, status)
                  VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                  ON CONFLICT (object_key) DO NOTHING",
            )
            .bind(opportunity_id)
            .bind(doc.source_url.rsplit('/').next().unwrap_or(&doc.source_url))
            .bind(&doc.object_key)
            .bind(doc.size_bytes)
            .bind(&doc.mime_type)
            .bind(if doc.text.is_empty() { None } else { Some(&doc.text) })
            .bind(&doc.payload)
            .bind(doc.status)
            .execute(&mut *tx)
            .await
            .map_err(ScrapeError::Database)?;
            pdf_count += 1;
        }

        tx.commit().await.map_err(ScrapeError::Database)?;

        Ok(RunOutcome::Completed(RunStats {
            pages: pagination_stats.pages,
            items: all_opportunities.len(),
            pdfs: pdf_count,
        }))
    }

    async fn load_site(&self, site_id: Uuid) -> Result<Site, ScrapeError> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
            .bind(site_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ScrapeError::Database)
    }

    async fn mark_legal_blocked(&self, site_id: Uuid) {
        if let Err(e) = sqlx::query("UPDATE sites SET legal_blocked = true, updated_at = now() WHERE id = $1")
            .bind(site_id)
            .execute(&self.pool)
            .await
        {
            warn!(error = %e, "failed to mark site legal_blocked");
        }
    }

    fn decrypt_credentials(&self, site: &Site) -> Result<Option<PlaintextCredentials>, ScrapeError> {
        let Some(sealed) = &site.encrypted_credentials else {
            return Ok(None);
        };
        let plaintext = self.vault.open(sealed)?;
        let creds: PlaintextCredentials =
            serde_json::from_slice(&plaintext).map_err(|e| ScrapeError::Other(anyhow::anyhow!("malformed credential blob: {e}")))?;
        Ok(Some(creds))
    }

    async fn establish_session(
        &self,
        page: &chromiumoxide::Page,
        site: &Site,
        site_config: &SiteConfig,
        credentials: Option<&PlaintextCredentials>,
    ) -> Result<(), ScrapeError> {
        if let Some(state) = self.session_store.load(site.id).await.map_err(|e| ScrapeError::Other(e.into()))? {
            info!("reusing cached session");
            apply_browser_state(page, &state).await?;
            return Ok(());
        }

        let outcome = self
            .auth_engine
            .authenticate(page, &site.url, site.auth_type, credentials, &site_config.auth)
            .await?;
        if !outcome.ok {
            return Err(ScrapeError::Other(anyhow::anyhow!(
                outcome.error.unwrap_or_else(|| "authentication did not succeed".to_string())
            )));
        }
        let state = outcome.into_browser_state();
        if let Err(e) = self.session_store.save(site.id, &state).await {
            warn!(error = %e, "failed to cache session, continuing without cache");
        }
        Ok(())
    }
}

async fn apply_browser_state(page: &chromiumoxide::Page, state: &crate::models::BrowserState) -> Result<(), ScrapeError> {
    let cookies: Vec<CookieParam> = state
        .cookies
        .iter()
        .filter_map(|c| {
            CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .domain(c.domain.clone())
                .path(c.path.clone())
                .http_only(c.http_only)
                .secure(c.secure)
                .build()
                .ok()
        })
        .collect();
    if !cookies.is_empty() {
        page.set_cookies(cookies).await.map_err(|e| ScrapeError::Browser(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    /// `RunStats` serializes cleanly into the `Job.stats` JSON blob shape
    /// (`{pages, items, pdfs, duration}`).
    #[test]
    fn run_stats_serializes_expected_fields() {
        let stats = super::RunStats {
            pages: 3,
            items: 12,
            pdfs: 2,
        };
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(value["pages"], 3);
        assert_eq!(value["items"], 12);
        assert_eq!(value["pdfs"], 2);
    }
}
