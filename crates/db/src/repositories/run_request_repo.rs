//! Repository for the `run_requests` and `run_request_paths` tables.
//!
//! Status and log writes carry a terminal-status guard in SQL, so a
//! finished run request is never mutated again even if a stale dispatch
//! attempt tries to.

use std::time::Duration;

use runbench_core::error::CoreError;
use runbench_core::run_status::{RunStatus, StatusId, TERMINAL_STATUSES};
use runbench_core::types::DbId;
use runbench_core::validation::validate_submission;
use sqlx::PgPool;

use crate::models::run_request::{
    RunRequestDetail, RunRequestListQuery, RunRequestRow, SubmitRunRequest,
};
use crate::error::RepoError;
use crate::repositories::{DispatchJobRepo, TestFileRepo};

/// Column list for `run_requests` queries.
const COLUMNS: &str = "\
    id, requested_by, environment_id, status_id, logs, created_at, updated_at";

/// Run request joined with its environment name and ordered paths.
const DETAIL_SELECT: &str = "\
    SELECT r.id, r.requested_by, r.environment_id, e.name AS environment_name, \
           r.status_id, r.logs, \
           ARRAY( \
               SELECT p.path FROM run_request_paths rp \
               JOIN test_file_paths p ON p.id = rp.path_id \
               WHERE rp.run_request_id = r.id \
               ORDER BY rp.position \
           ) AS paths, \
           r.created_at, r.updated_at \
    FROM run_requests r \
    JOIN test_environments e ON e.id = r.environment_id";

/// Maximum page size for listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for listing.
const DEFAULT_LIMIT: i64 = 50;

fn terminal_ids() -> [StatusId; 3] {
    TERMINAL_STATUSES.map(RunStatus::id)
}

pub struct RunRequestRepo;

impl RunRequestRepo {
    /// Persist a new run request and queue its first dispatch attempt.
    ///
    /// The request (status `CREATED`), its ordered paths, and the
    /// `retry_count = 0` dispatch job are written in one transaction.
    pub async fn submit(
        pool: &PgPool,
        input: &SubmitRunRequest,
    ) -> Result<RunRequestDetail, RepoError> {
        validate_submission(&input.requested_by, &input.path_ids)?;

        let mut tx = pool.begin().await?;

        let env_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM test_environments WHERE id = $1)",
        )
        .bind(input.environment_id)
        .fetch_one(&mut *tx)
        .await?;
        if !env_exists {
            return Err(CoreError::NotFound {
                entity: "TestEnvironment",
                id: input.environment_id,
            }
            .into());
        }

        let found = TestFileRepo::find_by_ids(&mut *tx, &input.path_ids).await?;
        if let Some(missing) = input
            .path_ids
            .iter()
            .find(|id| !found.iter().any(|f| f.id == **id))
        {
            return Err(CoreError::NotFound {
                entity: "TestFilePath",
                id: *missing,
            }
            .into());
        }

        let query = format!(
            "INSERT INTO run_requests (requested_by, environment_id, status_id) \
             VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, RunRequestRow>(&query)
            .bind(input.requested_by.trim())
            .bind(input.environment_id)
            .bind(RunStatus::Created.id())
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO run_request_paths (run_request_id, path_id, position) \
             SELECT $1, t.path_id, t.ord::INTEGER \
             FROM UNNEST($2::BIGINT[]) WITH ORDINALITY AS t(path_id, ord)",
        )
        .bind(row.id)
        .bind(&input.path_ids)
        .execute(&mut *tx)
        .await?;

        DispatchJobRepo::enqueue(&mut *tx, row.id, 0, Duration::ZERO).await?;

        tx.commit().await?;

        tracing::info!(
            run_request_id = row.id,
            environment_id = input.environment_id,
            paths = input.path_ids.len(),
            "Run request submitted",
        );

        Self::find_detail(pool, row.id)
            .await?
            .ok_or(RepoError::Database(sqlx::Error::RowNotFound))
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<RunRequestRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM run_requests WHERE id = $1");
        sqlx::query_as::<_, RunRequestRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find a run request with its environment name and ordered paths.
    pub async fn find_detail(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<RunRequestDetail>, sqlx::Error> {
        let query = format!("{DETAIL_SELECT} WHERE r.id = $1");
        sqlx::query_as::<_, RunRequestDetail>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List run requests newest first, with optional status filter.
    pub async fn list(
        pool: &PgPool,
        params: &RunRequestListQuery,
    ) -> Result<Vec<RunRequestDetail>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = match params.status_id {
            Some(_) => format!(
                "{DETAIL_SELECT} WHERE r.status_id = $3 \
                 ORDER BY r.created_at DESC, r.id DESC LIMIT $1 OFFSET $2"
            ),
            None => format!(
                "{DETAIL_SELECT} ORDER BY r.created_at DESC, r.id DESC LIMIT $1 OFFSET $2"
            ),
        };

        let mut q = sqlx::query_as::<_, RunRequestDetail>(&query)
            .bind(limit)
            .bind(offset);
        if let Some(status_id) = params.status_id {
            q = q.bind(status_id);
        }
        q.fetch_all(pool).await
    }

    /// Set the status unless the request is already terminal.
    ///
    /// Returns `true` if a row was updated.
    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        status: RunStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE run_requests SET status_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id <> ALL($3)",
        )
        .bind(id)
        .bind(status.id())
        .bind(&terminal_ids()[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the log text unless the request is already terminal.
    ///
    /// Returns `true` if a row was updated.
    pub async fn set_logs(pool: &PgPool, id: DbId, logs: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE run_requests SET logs = $2, updated_at = NOW() \
             WHERE id = $1 AND status_id <> ALL($3)",
        )
        .bind(id)
        .bind(logs)
        .bind(&terminal_ids()[..])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
