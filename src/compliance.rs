//! Compliance Gate: per-domain robots.txt + terms analysis with a 24h verdict cache.
//!
//! The cache shape (a `DashMap` keyed by domain, entries carrying their own
//! expiry) mirrors a domain-health map; the prohibition-phrase list and
//! terms-probe paths follow a conservative, source-agnostic allowlist.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{ComplianceVerdict, RiskLevel};
use crate::utils::constants::COMPLIANCE_CACHE_TTL_SECS;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("fetching robots.txt for {domain} failed: {source}")]
    RobotsFetch {
        domain: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("scraping {domain} is not permitted: {reason}")]
    Violation { domain: String, reason: String },
    #[error("verdict inverted mid-run for {domain}: previously allowed, now disallowed")]
    Inversion { domain: String },
}

/// Paths probed, in order, for a Terms & Conditions page, once homepage-link
/// scanning has also failed. Mirrors `find_terms_page`'s `terms_patterns`.
pub const TERMS_PROBE_PATHS: &[&str] = &[
    "/terms",
    "/terms-and-conditions",
    "/terms-of-use",
    "/terms-of-service",
    "/legal",
    "/legal-notices",
    "/conditions-of-use",
    "/website-terms",
    "/site-terms",
    "/policies",
];

/// Paths probed for an official API, so the verdict can recommend it instead
/// of scraping without blocking the scrape itself.
pub const API_PROBE_PATHS: &[&str] = &[
    "/api",
    "/api/v1",
    "/api/v2",
    "/api/docs",
    "/swagger",
    "/openapi",
    "/graphql",
    "/developers",
];

/// Phrases whose presence in a terms page unambiguously prohibits automated access.
pub const PROHIBITION_PHRASES: &[&str] = &[
    "no automated access",
    "no scraping",
    "no data mining",
    "no robots",
    "no crawling",
    "no harvesting",
    "automated access is prohibited",
    "do not use automated",
];

/// Government-domain fragments that relax the default risk posture.
const GOVERNMENT_TLD_FRAGMENTS: &[&str] = &[".gov", ".mil", ".gov.au", ".gov.uk", ".edu"];

fn is_government_domain(domain: &str) -> bool {
    GOVERNMENT_TLD_FRAGMENTS.iter().any(|frag| domain.contains(frag))
}

struct CachedVerdict {
    verdict: ComplianceVerdict,
}

/// Per-domain compliance cache and robots.txt / terms checker.
pub struct ComplianceGate {
    http: Client,
    cache: Arc<DashMap<String, CachedVerdict>>,
    user_agent: String,
}

impl ComplianceGate {
    #[must_use]
    pub fn new(http: Client, user_agent: impl Into<String>) -> Self {
        Self {
            http,
            cache: Arc::new(DashMap::new()),
            user_agent: user_agent.into(),
        }
    }

    /// Produce a `ComplianceVerdict` for `site_url`, using the 24h cache when fresh.
    pub async fn check(&self, site_url: &str) -> Result<ComplianceVerdict, ComplianceError> {
        let domain = extract_domain(site_url);
        let now = chrono::Utc::now();

        if let Some(entry) = self.cache.get(&domain)
            && !entry.verdict.is_expired(now)
        {
            debug!(%domain, "compliance verdict served from cache");
            return Ok(entry.verdict.clone());
        }

        let verdict = self.compute_verdict(site_url, &domain).await?;
        self.cache.insert(
            domain.clone(),
            CachedVerdict {
                verdict: verdict.clone(),
            },
        );
        info!(%domain, allowed = verdict.allowed, risk = ?verdict.risk, "compliance verdict computed");
        Ok(verdict)
    }

    /// Detect a mid-run inversion: a previously-`allowed` verdict turning
    /// `disallowed` within the same job.
    pub fn assert_not_inverted(&self, domain: &str, previously_allowed: bool) -> Result<(), ComplianceError> {
        if let Some(entry) = self.cache.get(domain)
            && previously_allowed
            && !entry.verdict.allowed
        {
            return Err(ComplianceError::Inversion {
                domain: domain.to_string(),
            });
        }
        Ok(())
    }

    async fn compute_verdict(
        &self,
        site_url: &str,
        domain: &str,
    ) -> Result<ComplianceVerdict, ComplianceError> {
        let now = chrono::Utc::now();
        let robots = self.fetch_robots(site_url, domain).await;
        let terms_prohibited = self.terms_prohibit_scraping(site_url).await;
        let recommend_api_instead = self.probe_api(site_url).await;

        let government = is_government_domain(domain);

        let (allowed, risk, mut precautions) = if terms_prohibited {
            (false, RiskLevel::High, vec!["scraping explicitly prohibited in terms".to_string()])
        } else if !robots.allowed {
            (false, RiskLevel::Medium, vec!["restricted by robots.txt".to_string()])
        } else if government {
            (
                true,
                RiskLevel::Low,
                vec![
                    "respect rate limits".to_string(),
                    "access only public tender information".to_string(),
                    "include a proper user-agent".to_string(),
                ],
            )
        } else {
            (false, RiskLevel::Medium, vec!["terms unclear: seek explicit permission".to_string()])
        };

        if recommend_api_instead {
            precautions.push("an official API is available; prefer it over scraping".to_string());
        }

        let robots_crawl_delay_ms = robots.crawl_delay_secs.map(|s| s * 1000);

        Ok(ComplianceVerdict {
            domain: domain.to_string(),
            allowed,
            risk,
            robots_crawl_delay_ms,
            required_precautions: precautions,
            checked_at: now,
            expires_at: now + chrono::Duration::seconds(COMPLIANCE_CACHE_TTL_SECS as i64),
            recommend_api_instead,
        })
    }

    async fn fetch_robots(&self, site_url: &str, domain: &str) -> RobotsAnalysis {
        let robots_url = match reqwest::Url::parse(site_url).and_then(|u| u.join("/robots.txt")) {
            Ok(u) => u,
            Err(_) => return RobotsAnalysis::default(),
        };

        let body = match self
            .http
            .get(robots_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => text,
                Err(_) => return RobotsAnalysis::default(),
            },
            Ok(_) => return RobotsAnalysis::default(),
            Err(e) => {
                warn!(%domain, error = %e, "robots.txt fetch failed, assuming allowed");
                return RobotsAnalysis::default();
            }
        };

        parse_robots(&body, &self.user_agent, site_url)
    }

    async fn terms_prohibit_scraping(&self, site_url: &str) -> bool {
        let Some(terms_url) = self.find_terms_page(site_url).await else {
            return false;
        };
        let Ok(text) = self.fetch_text(&terms_url, 10).await else {
            return false;
        };
        let lower = text.to_lowercase();
        PROHIBITION_PHRASES.iter().any(|p| lower.contains(p))
    }

    async fn find_terms_page(&self, site_url: &str) -> Option<String> {
        let base = reqwest::Url::parse(site_url).ok()?;
        for path in TERMS_PROBE_PATHS {
            if let Ok(candidate) = base.join(path) {
                if let Ok(text) = self.fetch_text(candidate.as_str(), 5).await {
                    if text.to_lowercase().contains("terms") {
                        return Some(candidate.to_string());
                    }
                }
            }
        }
        None
    }

    async fn probe_api(&self, site_url: &str) -> bool {
        let Ok(base) = reqwest::Url::parse(site_url) else {
            return false;
        };
        for path in API_PROBE_PATHS {
            if let Ok(candidate) = base.join(path) {
                if let Ok(text) = self.fetch_text(candidate.as_str(), 5).await {
                    let lower = text.to_lowercase();
                    if ["api", "endpoint", "swagger", "openapi", "graphql"]
                        .iter()
                        .any(|t| lower.contains(t))
                    {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn fetch_text(&self, url: &str, timeout_secs: u64) -> Result<String, reqwest::Error> {
        self.http
            .get(url)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[derive(Default)]
struct RobotsAnalysis {
    allowed: bool,
    crawl_delay_secs: Option<u64>,
}

fn parse_robots(body: &str, user_agent: &str, site_url: &str) -> RobotsAnalysis {
    let mut matcher = robotstxt::DefaultMatcher::default();
    let probe_paths = ["/tender/", "/search/", "/api/", "/documents/", "/opportunities/"];
    let base = reqwest::Url::parse(site_url).ok();
    let allowed = probe_paths.iter().all(|p| {
        let test_url = base
            .as_ref()
            .and_then(|b| b.join(p).ok())
            .map(|u| u.to_string())
            .unwrap_or_else(|| (*p).to_string());
        matcher.one_agent_allowed_by_robots(body, user_agent, &test_url)
    });

    let mut crawl_delay_secs = None;
    let mut current_agent: Option<String> = None;
    for line in body.lines() {
        let line = line.trim();
        if let Some(rest) = line.to_lowercase().strip_prefix("user-agent:") {
            current_agent = Some(rest.trim().to_string());
        } else if line.to_lowercase().starts_with("crawl-delay:")
            && match current_agent.as_deref() {
                Some("*") => true,
                Some(a) => a.eq_ignore_ascii_case(user_agent),
                None => false,
            }
        {
            if let Some((_, value)) = line.split_once(':') {
                crawl_delay_secs = value.trim().parse::<u64>().ok();
            }
        }
    }

    RobotsAnalysis {
        allowed,
        crawl_delay_secs,
    }
}

fn extract_domain(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| url.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn government_domains_detected() {
        assert!(is_government_domain("tenders.example.gov.au"));
        assert!(is_government_domain("procurement.agency.gov"));
        assert!(!is_government_domain("example.com"));
    }

    #[test]
    fn prohibition_phrases_are_case_insensitive_match() {
        let text = "Automated Access Is Prohibited on this site.".to_lowercase();
        assert!(PROHIBITION_PHRASES.iter().any(|p| text.contains(p)));
    }

    #[test]
    fn extract_domain_lowercases_host() {
        assert_eq!(extract_domain("https://Example.GOV/x"), "example.gov");
    }
}
