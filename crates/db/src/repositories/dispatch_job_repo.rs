//! Repository for the `dispatch_jobs` queue.
//!
//! Rows are inserted with a `run_after` due time and removed when a worker
//! claims them, so each message is delivered to exactly one worker.

use std::time::Duration;

use runbench_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::dispatch_job::DispatchJob;

/// Column list for `dispatch_jobs` queries.
const COLUMNS: &str = "id, run_request_id, retry_count, run_after, created_at";

pub struct DispatchJobRepo;

impl DispatchJobRepo {
    /// Queue attempt `retry_count` of a run request, due after `delay`.
    pub async fn enqueue<'e, E: PgExecutor<'e>>(
        executor: E,
        run_request_id: DbId,
        retry_count: i32,
        delay: Duration,
    ) -> Result<DispatchJob, sqlx::Error> {
        let query = format!(
            "INSERT INTO dispatch_jobs (run_request_id, retry_count, run_after) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DispatchJob>(&query)
            .bind(run_request_id)
            .bind(retry_count)
            .bind(delay.as_secs_f64())
            .fetch_one(executor)
            .await
    }

    /// Atomically remove and return up to `limit` due jobs, oldest first.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row.
    pub async fn claim_due(pool: &PgPool, limit: i64) -> Result<Vec<DispatchJob>, sqlx::Error> {
        let query = format!(
            "DELETE FROM dispatch_jobs \
             WHERE id IN ( \
                 SELECT id FROM dispatch_jobs \
                 WHERE run_after <= NOW() \
                 ORDER BY run_after ASC, id ASC \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let mut jobs = sqlx::query_as::<_, DispatchJob>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        // DELETE ... RETURNING does not preserve the subquery order.
        jobs.sort_by_key(|j| (j.run_after, j.id));
        Ok(jobs)
    }

    /// Queued, not yet claimed jobs for one run request.
    pub async fn list_for_run_request(
        pool: &PgPool,
        run_request_id: DbId,
    ) -> Result<Vec<DispatchJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM dispatch_jobs WHERE run_request_id = $1 ORDER BY run_after, id"
        );
        sqlx::query_as::<_, DispatchJob>(&query)
            .bind(run_request_id)
            .fetch_all(pool)
            .await
    }
}
