//! Process-wide configuration types.
//!
//! `AppConfig` is the process-wide configuration loaded once at worker
//! startup (database DSN, object-store endpoint, LLM endpoint, vault key,
//! proxy list, challenge-solver URL). `SiteConfig` is the per-Site JSON
//! blob, deserialized out of `Site.scraping_config` for one scrape run.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide configuration, loaded once at worker startup and passed
/// into every Scrape Runner construction as an explicit dependency rather
/// than a global singleton.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub(crate) database_url: String,
    pub(crate) redis_url: String,
    pub(crate) vault_key: Vec<u8>,
    pub(crate) object_store_endpoint: String,
    pub(crate) object_store_bucket: String,
    pub(crate) object_store_access_key: Option<String>,
    pub(crate) object_store_secret_key: Option<String>,
    pub(crate) llm_endpoint: Option<String>,
    pub(crate) llm_model: Option<String>,
    pub(crate) llm_api_key: Option<String>,
    pub(crate) challenge_solver_url: Option<String>,
    pub(crate) captcha_service_key: Option<String>,
    pub(crate) proxy_list: Vec<String>,
    pub(crate) worker_pool_size: usize,
    pub(crate) job_total_timeout: Duration,
    pub(crate) job_soft_timeout: Duration,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) headless: bool,
}

impl AppConfig {
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    #[must_use]
    pub fn vault_key(&self) -> &[u8] {
        &self.vault_key
    }

    #[must_use]
    pub fn object_store_endpoint(&self) -> &str {
        &self.object_store_endpoint
    }

    #[must_use]
    pub fn object_store_bucket(&self) -> &str {
        &self.object_store_bucket
    }

    #[must_use]
    pub fn object_store_credentials(&self) -> Option<(&str, &str)> {
        match (&self.object_store_access_key, &self.object_store_secret_key) {
            (Some(a), Some(s)) => Some((a, s)),
            _ => None,
        }
    }

    #[must_use]
    pub fn llm_endpoint(&self) -> Option<&str> {
        self.llm_endpoint.as_deref()
    }

    #[must_use]
    pub fn llm_model(&self) -> Option<&str> {
        self.llm_model.as_deref()
    }

    #[must_use]
    pub fn llm_api_key(&self) -> Option<&str> {
        self.llm_api_key.as_deref()
    }

    #[must_use]
    pub fn challenge_solver_url(&self) -> Option<&str> {
        self.challenge_solver_url.as_deref()
    }

    #[must_use]
    pub fn captcha_service_key(&self) -> Option<&str> {
        self.captcha_service_key.as_deref()
    }

    #[must_use]
    pub fn proxy_list(&self) -> &[String] {
        &self.proxy_list
    }

    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    #[must_use]
    pub fn job_total_timeout(&self) -> Duration {
        self.job_total_timeout
    }

    #[must_use]
    pub fn job_soft_timeout(&self) -> Duration {
        self.job_soft_timeout
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }
}

/// Authentication sub-config of a Site's `scraping_config` JSON blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: Option<String>,
    pub login_url: Option<String>,
    #[serde(default)]
    pub selectors: std::collections::HashMap<String, String>,
    pub success_indicator: Option<String>,
    pub test_endpoint: Option<String>,
    pub header_name: Option<String>,
    pub query_param: Option<String>,
    pub cookie_name: Option<String>,
    #[serde(default)]
    pub cookies: Vec<(String, String)>,
}

/// Pagination sub-config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub hint: Option<String>,
    pub max_pages: Option<u32>,
}

/// Selector-mode extraction sub-config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorsConfig {
    pub opportunity_container: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<String>,
    pub value: Option<String>,
    pub reference_number: Option<String>,
    /// Anchor selector, scoped to one `opportunity_container`, whose `href`
    /// is the detail link for that item and becomes its `source_url`.
    pub link: Option<String>,
    pub documents: Option<String>,
}

/// The Site Config JSON blob persisted on `Site.scraping_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub selectors: SelectorsConfig,
    pub rate_limit_ms: Option<u64>,
    pub extraction_hints: Option<String>,
    pub start_url: Option<String>,
}

impl SiteConfig {
    /// Parse a Site's persisted `scraping_config` JSON value, defaulting any
    /// missing sub-object rather than failing the job over an absent key.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}
