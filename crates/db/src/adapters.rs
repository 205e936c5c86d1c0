//! Postgres implementations of the dispatcher's collaborator traits.
//!
//! Each adapter is a thin wrapper over a pool clone that delegates to the
//! repositories and maps `sqlx::Error` into [`CoreError::Internal`].

use std::time::Duration;

use async_trait::async_trait;
use runbench_core::error::CoreError;
use runbench_core::run::{DispatchTask, RunRequest};
use runbench_core::run_status::RunStatus;
use runbench_core::store::{DelayScheduler, EnvironmentLock, RunStore};
use runbench_core::types::DbId;
use sqlx::PgPool;

use crate::repositories::{DispatchJobRepo, EnvironmentRepo, RunRequestRepo};

fn internal(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("Database error: {e}"))
}

// ---------------------------------------------------------------------------
// Run store
// ---------------------------------------------------------------------------

/// [`RunStore`] backed by the `run_requests` table.
#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load(&self, id: DbId) -> Result<RunRequest, CoreError> {
        RunRequestRepo::find_detail(&self.pool, id)
            .await
            .map_err(internal)?
            .ok_or(CoreError::NotFound {
                entity: "RunRequest",
                id,
            })?
            .into_domain()
    }

    async fn set_status(&self, id: DbId, status: RunStatus) -> Result<(), CoreError> {
        let updated = RunRequestRepo::set_status(&self.pool, id, status)
            .await
            .map_err(internal)?;
        if !updated {
            tracing::warn!(
                run_request_id = id,
                status = %status,
                "Status write ignored (missing or terminal)",
            );
        }
        Ok(())
    }

    async fn set_logs(&self, id: DbId, logs: &str) -> Result<(), CoreError> {
        let updated = RunRequestRepo::set_logs(&self.pool, id, logs)
            .await
            .map_err(internal)?;
        if !updated {
            tracing::warn!(run_request_id = id, "Log write ignored (missing or terminal)");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment lock
// ---------------------------------------------------------------------------

/// [`EnvironmentLock`] backed by `test_environments.is_busy`.
///
/// The flag lives in the shared database, so exclusion holds across every
/// worker process pointed at it.
#[derive(Clone)]
pub struct PgEnvironmentLock {
    pool: PgPool,
}

impl PgEnvironmentLock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvironmentLock for PgEnvironmentLock {
    async fn try_acquire(&self, environment: &str) -> Result<bool, CoreError> {
        if EnvironmentRepo::try_acquire(&self.pool, environment)
            .await
            .map_err(internal)?
        {
            return Ok(true);
        }
        // Distinguish "busy" from "no such environment".
        match EnvironmentRepo::find_by_name(&self.pool, environment)
            .await
            .map_err(internal)?
        {
            Some(_) => Ok(false),
            None => Err(CoreError::EnvironmentNotFound(environment.to_string())),
        }
    }

    async fn release(&self, environment: &str) -> Result<(), CoreError> {
        if EnvironmentRepo::release(&self.pool, environment)
            .await
            .map_err(internal)?
        {
            Ok(())
        } else {
            Err(CoreError::EnvironmentNotFound(environment.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Delay scheduler
// ---------------------------------------------------------------------------

/// [`DelayScheduler`] that inserts a future-dated row into `dispatch_jobs`.
#[derive(Clone)]
pub struct PgDispatchQueue {
    pool: PgPool,
}

impl PgDispatchQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DelayScheduler for PgDispatchQueue {
    async fn schedule(&self, delay: Duration, task: DispatchTask) -> Result<(), CoreError> {
        let retry_count = i32::try_from(task.retry_count).map_err(|_| {
            CoreError::Validation(format!("retry_count {} out of range", task.retry_count))
        })?;
        let job = DispatchJobRepo::enqueue(&self.pool, task.run_request_id, retry_count, delay)
            .await
            .map_err(internal)?;
        tracing::debug!(
            job_id = job.id,
            run_request_id = task.run_request_id,
            retry_count,
            delay_secs = delay.as_secs(),
            "Dispatch attempt scheduled",
        );
        Ok(())
    }
}
