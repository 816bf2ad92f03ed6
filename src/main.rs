//! Worker process binary: claims Jobs from the database-backed queue and
//! executes them through the Scrape Runner.
//!
//! Global singletons (logger, credential manager, settings) are re-expressed
//! here as explicit values built once at startup and threaded into
//! `ScrapeRunner::new`.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use hoistscout_core::browser_pool::{BrowserPool, BrowserPoolConfig};
use hoistscout_core::documents::{DocumentProcessor, FilesystemObjectStore};
use hoistscout_core::extractor::HttpLlmClient;
use hoistscout_core::{
    AppConfig, AuthEngine, ComplianceGate, Extractor, JobQueue, RateLimiter, ScrapeRunner, SessionStore, Vault,
    WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = hoistscout_core::config::from_env().context("failed to load AppConfig from the environment")?;
    let (worker, browser_pool) = build_worker(&config).await?;

    tracing::info!(worker_id = worker.id(), "starting worker pool");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let pool_handle = tokio::spawn(Arc::new(worker).run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);
    pool_handle.await.context("worker pool task panicked")?;
    browser_pool.shutdown().await.context("failed to shut down the browser pool")?;

    Ok(())
}

async fn build_worker(config: &AppConfig) -> anyhow::Result<(WorkerPool, Arc<BrowserPool>)> {
    let pg_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(config.database_url())
        .await
        .context("failed to connect to the database")?;

    let queue = JobQueue::from_pool(pg_pool.clone());
    let vault = Arc::new(Vault::new(config.vault_key()).context("vault key rejected at startup")?);
    let http = reqwest::Client::builder()
        .cookie_store(false)
        .build()
        .context("failed to build the shared HTTP client")?;

    let compliance = Arc::new(ComplianceGate::new(http.clone(), "HoistScoutBot/1.0"));
    let rate_limiter = Arc::new(RateLimiter::new());
    let session_store = SessionStore::connect(config.redis_url())
        .await
        .context("failed to connect to the session store")?;
    let auth_engine = Arc::new(AuthEngine::new(http.clone(), config.challenge_solver_url().map(str::to_string)));

    let llm_client = config
        .llm_endpoint()
        .map(|endpoint| -> Box<dyn hoistscout_core::LlmClient> {
            Box::new(HttpLlmClient::new(
                http.clone(),
                endpoint,
                config.llm_model().unwrap_or("gpt-4o-mini"),
                config.llm_api_key().map(str::to_string),
            ))
        });
    let extractor = Arc::new(Extractor::new(llm_client));

    let object_store = Arc::new(FilesystemObjectStore::new(
        std::env::var("OBJECT_STORE_LOCAL_DIR").unwrap_or_else(|_| "./data/objects".to_string()),
    ));
    let documents = Arc::new(DocumentProcessor::new(http.clone(), object_store, None));

    let runner = Arc::new(ScrapeRunner::new(
        pg_pool,
        queue.clone(),
        vault,
        compliance,
        rate_limiter,
        session_store,
        auth_engine,
        extractor,
        documents,
    ));
    runner.ensure_schema().await.context("failed to ensure the schema exists")?;

    let browser_pool = BrowserPool::new(BrowserPoolConfig {
        headless: config.headless(),
        min_pool_size: config.worker_pool_size().min(2),
        max_pool_size: config.worker_pool_size() + 2,
        ..BrowserPoolConfig::default()
    });
    browser_pool.start().await.context("failed to start the browser pool")?;

    let worker = WorkerPool::new(
        queue,
        runner,
        Arc::clone(&browser_pool),
        config.worker_pool_size(),
        config.heartbeat_interval(),
    );
    Ok((worker, browser_pool))
}
