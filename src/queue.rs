//! Job Queue: a durable, Postgres-backed task queue with atomic claim semantics.
//!
//! Follows a pool/schema-as-constant pattern (`PoolOptions::new().max_connections(n)`,
//! a `CREATE TABLE IF NOT EXISTS` schema run once at startup), built on
//! Postgres rather than SQLite because `claim` needs
//! `SELECT ... FOR UPDATE SKIP LOCKED` across concurrent worker processes,
//! which a single-writer database can't give.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Job, JobKind, JobStatus};

/// Schema for the Job table. Run once at startup; `IF NOT EXISTS` makes
/// this idempotent across worker restarts.
const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    site_id UUID NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority SMALLINT NOT NULL DEFAULT 5,
    scheduled_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    error TEXT,
    stats JSONB NOT NULL DEFAULT '{}'::jsonb,
    retry_count INT NOT NULL DEFAULT 0,
    max_retries INT NOT NULL DEFAULT 3,
    worker_id TEXT,
    last_heartbeat_at TIMESTAMPTZ,
    cancel_requested BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS jobs_claim_idx ON jobs (status, scheduled_at) WHERE status = 'pending';
";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("cannot {action} job {id} from status {from:?}")]
    IllegalTransition {
        id: Uuid,
        from: JobStatus,
        action: &'static str,
    },
}

/// Parameters for enqueueing a new Job.
pub struct JobSpec {
    pub site_id: Uuid,
    pub kind: JobKind,
    pub priority: i16,
    pub scheduled_at: DateTime<Utc>,
    pub max_retries: i32,
}

impl JobSpec {
    #[must_use]
    pub fn now(site_id: Uuid, kind: JobKind) -> Self {
        Self {
            site_id,
            kind,
            priority: 5,
            scheduled_at: Utc::now(),
            max_retries: 3,
        }
    }
}

/// Durable queue over the `jobs` table. Cheaply `Clone`-able; wraps a shared
/// connection pool the way `LinkIndex` wraps its `SqlitePool`.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub async fn connect(database_url: &str) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `enqueue(job_spec) -> job_id`.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<Uuid, QueueError> {
        let row = sqlx::query(
            r"INSERT INTO jobs (site_id, kind, status, priority, scheduled_at, max_retries)
              VALUES ($1, $2, 'pending', $3, $4, $5)
              RETURNING id",
        )
        .bind(spec.site_id)
        .bind(spec.kind)
        .bind(spec.priority)
        .bind(spec.scheduled_at)
        .bind(spec.max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    /// `claim(worker_id, queues[]) -> Job?`: atomically picks
    /// the highest-priority, oldest-scheduled eligible pending Job with
    /// `FOR UPDATE SKIP LOCKED` so concurrent workers never collide, then
    /// transitions it to `running` in the same statement via a CTE.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let row: Option<PgRow> = sqlx::query(
            r"WITH candidate AS (
                SELECT id FROM jobs
                WHERE status = 'pending' AND scheduled_at <= $1
                ORDER BY priority DESC, scheduled_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
              )
              UPDATE jobs
              SET status = 'running', started_at = $1, worker_id = $2,
                  last_heartbeat_at = $1, updated_at = $1
              FROM candidate
              WHERE jobs.id = candidate.id
              RETURNING jobs.*",
        )
        .bind(now)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_job))
    }

    /// `complete(job_id, stats)`: `running -> completed`.
    pub async fn complete(&self, job_id: Uuid, stats: serde_json::Value) -> Result<(), QueueError> {
        let result = sqlx::query(
            r"UPDATE jobs SET status = 'completed', completed_at = now(), stats = $2, updated_at = now()
              WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(stats)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.illegal_transition_or_not_found(job_id, "complete").await);
        }
        Ok(())
    }

    /// `fail(job_id, error, retry?)`: `running -> failed`,
    /// optionally re-enqueued with `backoff(retry_count)` when the caller
    /// passes `retry_after` (the Scrape Runner decides this from
    /// `retry_count < max_retries`).
    pub async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        retry_after: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let result = match retry_after {
            Some(scheduled_at) => {
                sqlx::query(
                    r"UPDATE jobs
                      SET status = 'pending', error = $2, retry_count = retry_count + 1,
                          scheduled_at = $3, started_at = NULL, worker_id = NULL, updated_at = now()
                      WHERE id = $1 AND status = 'running'",
                )
                .bind(job_id)
                .bind(error)
                .bind(scheduled_at)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r"UPDATE jobs
                      SET status = 'failed', error = $2, completed_at = now(),
                          retry_count = retry_count + 1, updated_at = now()
                      WHERE id = $1 AND status = 'running'",
                )
                .bind(job_id)
                .bind(error)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(self.illegal_transition_or_not_found(job_id, "fail").await);
        }
        Ok(())
    }

    /// `cancel(job_id)`: direct `pending -> cancelled`, or a
    /// flag set on `running` jobs observed at the Scrape Runner's next safe
    /// checkpoint.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query(
            r"UPDATE jobs SET status = 'cancelled', completed_at = now(), updated_at = now()
              WHERE id = $1 AND status = 'pending'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }

        let result = sqlx::query(
            r"UPDATE jobs SET cancel_requested = true, updated_at = now()
              WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.illegal_transition_or_not_found(job_id, "cancel").await);
        }
        Ok(())
    }

    /// Heartbeat a claimed Job so `reap_stale` doesn't reclaim it.
    pub async fn heartbeat(&self, job_id: Uuid) -> Result<(), QueueError> {
        sqlx::query("UPDATE jobs SET last_heartbeat_at = now() WHERE id = $1 AND status = 'running'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Whether `cancel_requested` is set on a `running` Job, checked by the
    /// Scrape Runner at each pagination page boundary.
    pub async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let flag: Option<bool> = sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1 AND status = 'running'")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(flag.unwrap_or(false))
    }

    /// `running -> cancelled` with whatever partial stats the Runner
    /// accumulated before it observed the cancellation flag.
    pub async fn finish_cancelled(&self, job_id: Uuid, stats: serde_json::Value) -> Result<(), QueueError> {
        let result = sqlx::query(
            r"UPDATE jobs SET status = 'cancelled', completed_at = now(), stats = $2, updated_at = now()
              WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(stats)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.illegal_transition_or_not_found(job_id, "finish_cancelled").await);
        }
        Ok(())
    }

    /// `reap_stale(older_than)`: re-enqueue any `running` Job
    /// whose worker hasn't heartbeated within `max_silence`.
    pub async fn reap_stale(&self, max_silence: chrono::Duration) -> Result<u64, QueueError> {
        let threshold = Utc::now() - max_silence;
        let result = sqlx::query(
            r"UPDATE jobs
              SET status = 'pending', started_at = NULL, worker_id = NULL,
                  error = 'reaped: worker heartbeat timed out', updated_at = now()
              WHERE status = 'running'
                AND (last_heartbeat_at IS NULL OR last_heartbeat_at < $1)",
        )
        .bind(threshold)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, QueueError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;
        Ok(row_to_job(row))
    }

    async fn illegal_transition_or_not_found(&self, job_id: Uuid, action: &'static str) -> QueueError {
        match self.get(job_id).await {
            Ok(job) => QueueError::IllegalTransition {
                id: job_id,
                from: job.status,
                action,
            },
            Err(e) => e,
        }
    }
}

/// Optional filters for `QueueApi::list_jobs`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub site_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub limit: i64,
}

/// The external Queue API surface a façade calls
/// (`submit_job`/`get_job`/`list_jobs`/`cancel_job`), kept separate from
/// `JobQueue`'s worker-side `claim`/`complete`/`fail`/`heartbeat` contract
/// even though both sit on the same `jobs` table.
#[derive(Clone)]
pub struct QueueApi {
    queue: JobQueue,
}

impl QueueApi {
    #[must_use]
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }

    pub async fn submit_job(&self, site_id: Uuid, kind: JobKind) -> Result<Uuid, QueueError> {
        self.queue.enqueue(JobSpec::now(site_id, kind)).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.queue.get(job_id).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.queue.cancel(job_id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, QueueError> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(site_id) = filter.site_id {
            builder.push(" AND site_id = ").push_bind(site_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        builder.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);

        let rows = builder.build().fetch_all(&self.queue.pool).await?;
        Ok(rows.into_iter().map(row_to_job).collect())
    }
}

fn row_to_job(row: PgRow) -> Job {
    Job {
        id: row.get("id"),
        site_id: row.get("site_id"),
        kind: row.get("kind"),
        status: row.get("status"),
        priority: row.get("priority"),
        scheduled_at: row.get("scheduled_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error: row.get("error"),
        stats: row.get("stats"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        worker_id: row.get("worker_id"),
        last_heartbeat_at: row.get("last_heartbeat_at"),
        cancel_requested: row.get("cancel_requested"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pure ordering check: higher priority first, then older scheduled_at,
    /// ties broken by id, exercised against a plain in-memory sort using
    /// the same key the `claim` query's `ORDER BY` uses, since the real
    /// query needs a live Postgres connection.
    #[test]
    fn claim_order_prefers_priority_then_age_then_id() {
        let base = Utc::now();
        let mut candidates = vec![
            (5i16, base, Uuid::from_u128(2)),
            (9i16, base, Uuid::from_u128(1)),
            (9i16, base - chrono::Duration::seconds(60), Uuid::from_u128(3)),
            (9i16, base - chrono::Duration::seconds(60), Uuid::from_u128(1)),
        ];
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        assert_eq!(candidates[0], (9i16, base - chrono::Duration::seconds(60), Uuid::from_u128(1)));
    }
}
