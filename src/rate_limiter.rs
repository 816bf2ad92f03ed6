//! Rate Limiter: per-domain minimum inter-request delay with a violation counter.
//!
//! A lock-free-deny token bucket (`Allow`/`Deny{retry_after}`) doesn't fit
//! here: this component needs blocking-until-ready semantics plus a
//! per-domain violation count that can abort the job, so state is a plain
//! `Mutex<HashMap<...>>` instead — it needs to sleep here, not just decide.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

use crate::utils::constants::{
    DEFAULT_GOV_DELAY_MS, DEFAULT_HOST_DELAY_MS, RATE_LIMIT_VIOLATION_THRESHOLD,
};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit violated {count} times for domain {domain}, aborting job")]
    ViolationThresholdExceeded { domain: String, count: u32 },
}

impl RateLimitError {
    #[must_use]
    pub fn is_violation_threshold(&self) -> bool {
        matches!(self, Self::ViolationThresholdExceeded { .. })
    }
}

struct DomainState {
    last_request_at: Option<Instant>,
    violation_count: u32,
}

impl Default for DomainState {
    fn default() -> Self {
        Self {
            last_request_at: None,
            violation_count: 0,
        }
    }
}

/// In-process, per-worker rate limiter (§5: state is deliberately not shared
/// across processes — over-politeness is acceptable).
pub struct RateLimiter {
    domains: Mutex<HashMap<String, DomainState>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Default minimum delay for `domain`, before any robots.txt override.
    #[must_use]
    pub fn default_min_delay_ms(domain: &str) -> u64 {
        if is_government_domain(domain) {
            DEFAULT_GOV_DELAY_MS
        } else {
            DEFAULT_HOST_DELAY_MS
        }
    }

    /// Block until at least `min_delay_ms` have elapsed since the last
    /// request to `domain`, then record this request. More than
    /// `RATE_LIMIT_VIOLATION_THRESHOLD` violations (requests that arrived
    /// before the limiter let them through, observed at entry) abort the job.
    pub async fn acquire(&self, domain: &str, min_delay_ms: u64) -> Result<(), RateLimitError> {
        let wait = {
            let mut domains = self.domains.lock().expect("rate limiter mutex poisoned");
            let state = domains.entry(domain.to_string()).or_default();

            let wait = match state.last_request_at {
                Some(last) => {
                    let elapsed = last.elapsed().as_millis() as u64;
                    if elapsed < min_delay_ms {
                        state.violation_count += 1;
                        Some(Duration::from_millis(min_delay_ms - elapsed))
                    } else {
                        None
                    }
                }
                None => None,
            };

            if state.violation_count > RATE_LIMIT_VIOLATION_THRESHOLD {
                return Err(RateLimitError::ViolationThresholdExceeded {
                    domain: domain.to_string(),
                    count: state.violation_count,
                });
            }

            wait
        };

        if let Some(wait) = wait {
            warn!(domain, wait_ms = wait.as_millis() as u64, "rate limiter sleeping");
            tokio::time::sleep(wait).await;
        }

        let mut domains = self.domains.lock().expect("rate limiter mutex poisoned");
        domains.entry(domain.to_string()).or_default().last_request_at = Some(Instant::now());
        Ok(())
    }

    /// Current violation count for `domain`, for tests and diagnostics.
    #[must_use]
    pub fn violation_count(&self, domain: &str) -> u32 {
        self.domains
            .lock()
            .expect("rate limiter mutex poisoned")
            .get(domain)
            .map_or(0, |s| s.violation_count)
    }
}

fn is_government_domain(domain: &str) -> bool {
    [".gov", ".mil", ".edu"].iter().any(|frag| domain.contains(frag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_never_waits() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        limiter.acquire("example.com", 2000).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn second_request_waits_out_remaining_delay() {
        let limiter = RateLimiter::new();
        limiter.acquire("example.com", 200).await.unwrap();
        let start = Instant::now();
        limiter.acquire("example.com", 200).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn violation_threshold_aborts() {
        let limiter = RateLimiter::new();
        // The first call never violates (nothing to wait on); each call after
        // that violates once. `THRESHOLD + 1` calls push violation_count past
        // the threshold, so the next one is guaranteed to error.
        for _ in 0..=RATE_LIMIT_VIOLATION_THRESHOLD {
            let _ = limiter.acquire("slow.example.com", 50).await;
        }
        let result = limiter.acquire("slow.example.com", 50).await;
        assert!(matches!(result, Err(RateLimitError::ViolationThresholdExceeded { .. })));
    }

    #[test]
    fn government_domains_get_longer_default_delay() {
        assert_eq!(RateLimiter::default_min_delay_ms("agency.gov.au"), DEFAULT_GOV_DELAY_MS);
        assert_eq!(RateLimiter::default_min_delay_ms("example.com"), DEFAULT_HOST_DELAY_MS);
    }
}
