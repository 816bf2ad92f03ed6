//! Shared configuration constants.
//!
//! Default values referenced from more than one module, kept here to avoid
//! magic numbers scattered across the crate.

/// Default politeness delay for a government (`.gov`/`.mil`/etc) host, in milliseconds.
pub const DEFAULT_GOV_DELAY_MS: u64 = 3000;

/// Default politeness delay for a non-government host, in milliseconds.
pub const DEFAULT_HOST_DELAY_MS: u64 = 2000;

/// Consecutive rate-limit violations on a host before the Rate Limiter raises
/// `RateLimitExceeded` and the Scrape Runner aborts the job.
pub const RATE_LIMIT_VIOLATION_THRESHOLD: u32 = 3;

/// Backoff base, in seconds: `backoff(n) = RETRY_BACKOFF_BASE_SECS * 2^n`.
pub const RETRY_BACKOFF_BASE_SECS: u64 = 60;

/// Backoff cap, in seconds.
pub const RETRY_BACKOFF_CAP_SECS: u64 = 600;

/// Compliance verdict cache TTL, in seconds (24h).
pub const COMPLIANCE_CACHE_TTL_SECS: u64 = 24 * 3600;

/// Authenticated session TTL, in seconds (23h, just under the common 24h cookie lifetime).
pub const SESSION_TTL_SECS: u64 = 23 * 3600;

/// Maximum document download size, in bytes (50MB).
pub const MAX_DOCUMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Extractor LLM-mode prompt truncation limit, in characters.
pub const EXTRACTOR_MAX_PROMPT_CHARS: usize = 15_000;

/// Confidence multiplier applied per missing required field in an extracted opportunity.
pub const MISSING_FIELD_CONFIDENCE_PENALTY: f64 = 0.8;

/// Default worker pool size: concurrent Scrape Runner tasks per worker process.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Worker heartbeat interval, in seconds.
pub const WORKER_HEARTBEAT_SECS: u64 = 30;

/// Jittered delay range between pagination advances, in milliseconds.
pub const PAGINATION_ADVANCE_DELAY_MS: (u64, u64) = (800, 2400);

/// Consecutive empty pages before the Pagination Engine stops.
pub const PAGINATION_EMPTY_PAGE_STOP: u32 = 3;

/// Chrome user agent string used as the default stealth identity.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";
