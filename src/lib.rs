//! Job orchestration, scrape execution, and credential vault core for
//! tender/grant opportunity ingestion.
//!
//! The HTTP API façade, web frontend, CSV site-list ingestion, metrics/error
//! reporting wiring, the LLM backend itself, PDF/OCR text extraction, and
//! schema migrations live outside this crate; `extractor::LlmClient` and
//! `documents::TextExtractor` are the seams where those external
//! capabilities plug in.

pub mod auth;
pub mod browser_pool;
pub mod browser_profile;
pub mod browser_setup;
pub mod compliance;
pub mod config;
pub mod documents;
pub mod error;
pub mod extractor;
pub mod models;
pub mod pagination;
pub mod queue;
pub mod rate_limiter;
pub mod runner;
pub mod session_store;
pub mod utils;
pub mod vault;
pub mod worker;

pub use auth::AuthEngine;
pub use browser_pool::{BrowserPool, BrowserPoolConfig, PooledBrowserGuard};
pub use compliance::ComplianceGate;
pub use config::{AppConfig, SiteConfig};
pub use documents::DocumentProcessor;
pub use error::{ErrorCategory, ScrapeError};
pub use extractor::{Extractor, HttpLlmClient, LlmClient};
pub use models::{
    AuthType, BrowserState, ComplianceVerdict, CredentialCiphertext, Document, DocumentStatus, Job, JobKind, JobStatus,
    Opportunity, RiskLevel, Session, Site,
};
pub use pagination::PaginationEngine;
pub use queue::{JobFilter, JobQueue, JobSpec, QueueApi, QueueError};
pub use rate_limiter::RateLimiter;
pub use runner::ScrapeRunner;
pub use session_store::SessionStore;
pub use vault::Vault;
pub use worker::WorkerPool;
