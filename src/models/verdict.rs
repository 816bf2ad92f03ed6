//! Compliance Verdict entity: a cached decision about whether scraping a
//! domain is legally permitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// `{domain (primary), allowed, risk, robots_crawl_delay_ms?, required_precautions[],
/// checked_at, expires_at}`. Cached for 24h by `compliance::ComplianceGate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub domain: String,
    pub allowed: bool,
    pub risk: RiskLevel,
    pub robots_crawl_delay_ms: Option<u64>,
    pub required_precautions: Vec<String>,
    pub checked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set when `compliance::check_api_availability` found an official API;
    /// informational only, never blocks scraping by itself.
    pub recommend_api_instead: bool,
}

impl ComplianceVerdict {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
