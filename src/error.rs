//! Error taxonomy shared across the scrape pipeline.
//!
//! Every component below the Scrape Runner returns a typed error; the Runner
//! translates whatever it receives into one of the categories here before
//! recording `Job.error` and `stats.error_category`. Nothing below the Runner
//! boundary should panic or propagate a bare `anyhow::Error` across a job.

use std::time::Duration;
use thiserror::Error;

/// Coarse category attached to a failed Job, mirrored into `stats.error_category`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Auth,
    Structural,
    Compliance,
    Fatal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::Auth => "auth",
            Self::Structural => "structural",
            Self::Compliance => "compliance",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Top-level error a Scrape Runner run can fail with.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("compliance check failed: {0}")]
    Compliance(#[from] crate::compliance::ComplianceError),

    #[error("authentication failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("extraction failed: {0}")]
    Extraction(#[from] crate::extractor::ExtractionError),

    #[error("rate limit exceeded: {0}")]
    RateLimit(#[from] crate::rate_limiter::RateLimitError),

    #[error("vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    #[error("anti-detection failure: {0}")]
    AntiDetectionFailed(String),

    #[error("page load timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrapeError {
    /// Category used to drive retry policy and `stats.error_category`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Compliance(_) => ErrorCategory::Compliance,
            Self::RateLimit(e) if e.is_violation_threshold() => ErrorCategory::Compliance,
            Self::RateLimit(_) => ErrorCategory::Transient,
            Self::Auth(e) if e.is_retryable_once() => ErrorCategory::Auth,
            Self::Auth(_) => ErrorCategory::Fatal,
            Self::Extraction(_) => ErrorCategory::Structural,
            Self::Vault(_) => ErrorCategory::Fatal,
            Self::AntiDetectionFailed(_) => ErrorCategory::Fatal,
            Self::Timeout(_) => ErrorCategory::Transient,
            Self::Database(e) if is_transient_db_error(e) => ErrorCategory::Transient,
            Self::Database(_) => ErrorCategory::Fatal,
            Self::Browser(_) => ErrorCategory::Transient,
            Self::Other(_) => ErrorCategory::Fatal,
        }
    }

    /// Whether the Scrape Runner should re-enqueue the job with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient | ErrorCategory::Auth)
    }
}

fn is_transient_db_error(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
}

/// Exponential backoff with a cap, per spec: `backoff(n) = 60 * 2^n`, capped at 600s.
#[must_use]
pub fn retry_backoff(attempt: u32) -> Duration {
    let secs = crate::utils::constants::RETRY_BACKOFF_BASE_SECS
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX).max(1));
    Duration::from_secs(secs.min(crate::utils::constants::RETRY_BACKOFF_CAP_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_ten_minutes() {
        assert_eq!(retry_backoff(0), Duration::from_secs(60));
        assert_eq!(retry_backoff(1), Duration::from_secs(120));
        assert_eq!(retry_backoff(3), Duration::from_secs(480));
        assert_eq!(retry_backoff(10), Duration::from_secs(600));
    }
}
