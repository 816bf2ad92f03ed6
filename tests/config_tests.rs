//! Integration tests for `AppConfigBuilder`, exercised through the public
//! crate API the way a worker-process binary would construct `AppConfig`.

use hoistscout_core::config::AppConfigBuilder;

#[test]
fn build_applies_defaults_for_every_optional_field() {
    let config = AppConfigBuilder::new()
        .database_url("postgres://localhost/hoistscout")
        .vault_key(vec![0u8; 32])
        .build()
        .unwrap();

    assert_eq!(config.redis_url(), "redis://127.0.0.1:6379");
    assert!(config.headless());
    assert_eq!(config.worker_pool_size(), hoistscout_core::utils::constants::DEFAULT_WORKER_POOL_SIZE);
    assert!(config.llm_endpoint().is_none());
    assert!(config.challenge_solver_url().is_none());
}

#[test]
fn build_honors_every_explicit_override() {
    let config = AppConfigBuilder::new()
        .database_url("postgres://localhost/hoistscout")
        .vault_key(vec![1u8; 32])
        .redis_url("redis://cache.internal:6380")
        .worker_pool_size(8)
        .headless(false)
        .llm("https://llm.internal/v1/chat/completions", "gpt-4o-mini", Some("sk-test".to_string()))
        .challenge_solver_url("https://solver.internal")
        .proxy_list(vec!["http://proxy-a:8080".to_string(), "http://proxy-b:8080".to_string()])
        .build()
        .unwrap();

    assert_eq!(config.redis_url(), "redis://cache.internal:6380");
    assert_eq!(config.worker_pool_size(), 8);
    assert!(!config.headless());
    assert_eq!(config.llm_endpoint(), Some("https://llm.internal/v1/chat/completions"));
    assert_eq!(config.llm_model(), Some("gpt-4o-mini"));
    assert_eq!(config.llm_api_key(), Some("sk-test"));
    assert_eq!(config.challenge_solver_url(), Some("https://solver.internal"));
}

#[test]
fn build_fails_fast_without_database_url_or_vault_key() {
    assert!(AppConfigBuilder::new().vault_key(vec![0u8; 32]).build().is_err());
    assert!(AppConfigBuilder::new().database_url("postgres://x").build().is_err());
}
