//! Fallible builder for `AppConfig`, reading defaults from environment
//! variables via `std::env::var` rather than explicit setter calls, since
//! this config is process-wide and constructed once at worker startup.

use std::time::Duration;

use thiserror::Error;

use super::types::AppConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("environment variable {name} has an invalid value: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

#[derive(Default)]
pub struct AppConfigBuilder {
    database_url: Option<String>,
    redis_url: Option<String>,
    vault_key: Option<Vec<u8>>,
    object_store_endpoint: Option<String>,
    object_store_bucket: Option<String>,
    object_store_access_key: Option<String>,
    object_store_secret_key: Option<String>,
    llm_endpoint: Option<String>,
    llm_model: Option<String>,
    llm_api_key: Option<String>,
    challenge_solver_url: Option<String>,
    captcha_service_key: Option<String>,
    proxy_list: Vec<String>,
    worker_pool_size: Option<usize>,
    headless: Option<bool>,
}

impl AppConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn database_url(mut self, v: impl Into<String>) -> Self {
        self.database_url = Some(v.into());
        self
    }

    #[must_use]
    pub fn redis_url(mut self, v: impl Into<String>) -> Self {
        self.redis_url = Some(v.into());
        self
    }

    #[must_use]
    pub fn vault_key(mut self, v: Vec<u8>) -> Self {
        self.vault_key = Some(v);
        self
    }

    #[must_use]
    pub fn object_store_endpoint(mut self, v: impl Into<String>) -> Self {
        self.object_store_endpoint = Some(v.into());
        self
    }

    #[must_use]
    pub fn object_store_bucket(mut self, v: impl Into<String>) -> Self {
        self.object_store_bucket = Some(v.into());
        self
    }

    #[must_use]
    pub fn object_store_credentials(mut self, access: impl Into<String>, secret: impl Into<String>) -> Self {
        self.object_store_access_key = Some(access.into());
        self.object_store_secret_key = Some(secret.into());
        self
    }

    #[must_use]
    pub fn llm(mut self, endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        self.llm_endpoint = Some(endpoint.into());
        self.llm_model = Some(model.into());
        self.llm_api_key = api_key;
        self
    }

    #[must_use]
    pub fn challenge_solver_url(mut self, v: impl Into<String>) -> Self {
        self.challenge_solver_url = Some(v.into());
        self
    }

    #[must_use]
    pub fn captcha_service_key(mut self, v: impl Into<String>) -> Self {
        self.captcha_service_key = Some(v.into());
        self
    }

    #[must_use]
    pub fn proxy_list(mut self, v: Vec<String>) -> Self {
        self.proxy_list = v;
        self
    }

    #[must_use]
    pub fn worker_pool_size(mut self, v: usize) -> Self {
        self.worker_pool_size = Some(v);
        self
    }

    #[must_use]
    pub fn headless(mut self, v: bool) -> Self {
        self.headless = Some(v);
        self
    }

    /// Build, failing fast if the database DSN or vault key are absent: the
    /// vault has no key to open with, and the queue has no durable backing
    /// store without a DSN.
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        let database_url = self.database_url.ok_or(ConfigError::MissingVar("DATABASE_URL"))?;
        let vault_key = self.vault_key.ok_or(ConfigError::MissingVar("VAULT_KEY"))?;

        Ok(AppConfig {
            database_url,
            redis_url: self.redis_url.unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            vault_key,
            object_store_endpoint: self
                .object_store_endpoint
                .unwrap_or_else(|| "http://127.0.0.1:9000".to_string()),
            object_store_bucket: self.object_store_bucket.unwrap_or_else(|| "hoistscout".to_string()),
            object_store_access_key: self.object_store_access_key,
            object_store_secret_key: self.object_store_secret_key,
            llm_endpoint: self.llm_endpoint,
            llm_model: self.llm_model,
            llm_api_key: self.llm_api_key,
            challenge_solver_url: self.challenge_solver_url,
            captcha_service_key: self.captcha_service_key,
            proxy_list: self.proxy_list,
            worker_pool_size: self.worker_pool_size.unwrap_or(crate::utils::constants::DEFAULT_WORKER_POOL_SIZE),
            job_total_timeout: Duration::from_secs(30 * 60),
            job_soft_timeout: Duration::from_secs(25 * 60),
            heartbeat_interval: Duration::from_secs(crate::utils::constants::WORKER_HEARTBEAT_SECS),
            headless: self.headless.unwrap_or(true),
        })
    }
}

/// Load `AppConfig` from the process environment. Fails fast with
/// `MissingVar` if `DATABASE_URL` or `VAULT_KEY` are absent, mirroring the
/// Crypto Vault's own fail-fast rule.
pub fn from_env() -> Result<AppConfig, ConfigError> {
    let mut builder = AppConfigBuilder::new();

    if let Ok(v) = std::env::var("DATABASE_URL") {
        builder = builder.database_url(v);
    }
    if let Ok(v) = std::env::var("REDIS_URL") {
        builder = builder.redis_url(v);
    }
    if let Ok(v) = std::env::var("VAULT_KEY") {
        let bytes = hex::decode(&v).map_err(|e| ConfigError::InvalidVar {
            name: "VAULT_KEY",
            reason: e.to_string(),
        })?;
        builder = builder.vault_key(bytes);
    }
    if let Ok(v) = std::env::var("OBJECT_STORE_ENDPOINT") {
        builder = builder.object_store_endpoint(v);
    }
    if let Ok(v) = std::env::var("OBJECT_STORE_BUCKET") {
        builder = builder.object_store_bucket(v);
    }
    if let (Ok(a), Ok(s)) = (
        std::env::var("OBJECT_STORE_ACCESS_KEY"),
        std::env::var("OBJECT_STORE_SECRET_KEY"),
    ) {
        builder = builder.object_store_credentials(a, s);
    }
    if let Ok(endpoint) = std::env::var("LLM_ENDPOINT") {
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let api_key = std::env::var("LLM_API_KEY").ok();
        builder = builder.llm(endpoint, model, api_key);
    }
    if let Ok(v) = std::env::var("CHALLENGE_SOLVER_URL") {
        builder = builder.challenge_solver_url(v);
    }
    if let Ok(v) = std::env::var("CAPTCHA_SERVICE_KEY") {
        builder = builder.captcha_service_key(v);
    }
    if let Ok(v) = std::env::var("PROXY_LIST") {
        builder = builder.proxy_list(v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect());
    }
    if let Ok(v) = std::env::var("WORKER_POOL_SIZE") {
        let parsed = v.parse().map_err(|e| ConfigError::InvalidVar {
            name: "WORKER_POOL_SIZE",
            reason: format!("{e}"),
        })?;
        builder = builder.worker_pool_size(parsed);
    }
    if let Ok(v) = std::env::var("HEADLESS") {
        builder = builder.headless(v != "0" && v.to_lowercase() != "false");
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_fails_without_database_url() {
        let err = AppConfigBuilder::new().vault_key(vec![0u8; 32]).build();
        assert!(matches!(err, Err(ConfigError::MissingVar("DATABASE_URL"))));
    }

    #[test]
    fn build_fails_without_vault_key() {
        let err = AppConfigBuilder::new().database_url("postgres://x").build();
        assert!(matches!(err, Err(ConfigError::MissingVar("VAULT_KEY"))));
    }

    #[test]
    fn build_succeeds_with_required_fields_and_applies_defaults() {
        let cfg = AppConfigBuilder::new()
            .database_url("postgres://x")
            .vault_key(vec![0u8; 32])
            .build()
            .unwrap();
        assert_eq!(cfg.worker_pool_size(), crate::utils::constants::DEFAULT_WORKER_POOL_SIZE);
        assert!(cfg.headless());
    }
}
