//! Worker Pool: a long-running process that claims and executes Jobs.
//!
//! Generalizes a dynamic-scaling browser pool loop (a background task
//! ticking on an interval, bounded by a semaphore) into a fixed-size pool
//! of concurrent Scrape Runner executions, each backed by its own browser
//! context checked out of the `BrowserPool`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::browser_pool::BrowserPool;
use crate::queue::JobQueue;
use crate::runner::ScrapeRunner;

/// How often `reap_stale` runs, looking for `running` Jobs whose worker
/// hasn't heartbeated recently enough to still be alive.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// A `running` Job silent for longer than this is assumed to belong to a
/// dead worker: three missed heartbeats at the default 30s interval, plus
/// slack for one in-flight page fetch.
const STALE_JOB_THRESHOLD: chrono::Duration = chrono::Duration::seconds(5 * 60);

/// How long a worker with no claimable Job sleeps before polling again.
const EMPTY_QUEUE_POLL: Duration = Duration::from_secs(2);

pub struct WorkerPool {
    id: String,
    queue: JobQueue,
    runner: Arc<ScrapeRunner>,
    browsers: Arc<BrowserPool>,
    concurrency: usize,
    heartbeat_interval: Duration,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        queue: JobQueue,
        runner: Arc<ScrapeRunner>,
        browsers: Arc<BrowserPool>,
        concurrency: usize,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id: format!("worker-{}", Uuid::new_v4()),
            queue,
            runner,
            browsers,
            concurrency,
            heartbeat_interval,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register, then loop `claim -> run Scrape Runner -> record outcome` on
    /// `concurrency` concurrent slots until the process is asked to shut
    /// down, heartbeating every claimed Job on `heartbeat_interval` and
    /// reaping other workers' stale claims on `REAP_INTERVAL`.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(worker_id = %self.id, concurrency = self.concurrency, "worker pool starting");

        let reaper = {
            let queue = self.queue.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(REAP_INTERVAL) => {
                            match queue.reap_stale(STALE_JOB_THRESHOLD).await {
                                Ok(0) => {}
                                Ok(n) => info!(reaped = n, "reaped stale running jobs"),
                                Err(e) => warn!(error = %e, "reap_stale failed"),
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        // Each slot is its own claim/run loop; running `concurrency` of them
        // concurrently gives the bounded parallelism directly, with no extra
        // semaphore needed.
        let mut slots = Vec::with_capacity(self.concurrency);
        for slot in 0..self.concurrency {
            let pool = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            slots.push(tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        () = pool.claim_and_run(slot) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        let _ = shutdown.changed().await;
        for slot in slots {
            let _ = slot.await;
        }
        reaper.abort();
        info!(worker_id = %self.id, "worker pool stopped");
    }

    #[instrument(skip(self), fields(worker_id = %self.id, slot))]
    async fn claim_and_run(&self, slot: usize) {
        let job = match self.queue.claim(&self.id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(EMPTY_QUEUE_POLL).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "claim failed, backing off");
                tokio::time::sleep(EMPTY_QUEUE_POLL).await;
                return;
            }
        };

        info!(job_id = %job.id, site_id = %job.site_id, "claimed job");

        let guard = match self.browsers.acquire().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to acquire a browser, re-enqueueing job");
                let _ = self.queue.fail(job.id, &format!("no browser available: {e}"), Some(chrono::Utc::now())).await;
                return;
            }
        };

        let queue = self.queue.clone();
        let job_id = job.id;
        let heartbeat_interval = self.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            loop {
                tokio::time::sleep(heartbeat_interval).await;
                if queue.heartbeat(job_id).await.is_err() {
                    break;
                }
            }
        });

        let identity = guard.identity();
        self.runner.run_job(&job, guard.browser(), identity).await;
        heartbeat.abort();
    }
}
