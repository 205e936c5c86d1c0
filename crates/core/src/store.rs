//! Collaborator interfaces consumed by the dispatcher.
//!
//! Implementations live outside `core` (see `runbench-db` for the
//! Postgres-backed ones). The traits use `async_trait` so the dispatcher
//! can hold them as `Arc<dyn _>`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::run::{DispatchTask, RunRequest};
use crate::run_status::RunStatus;
use crate::types::DbId;

/// Run-request state, logs and environment reference.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Load a run request with its environment name and ordered paths.
    async fn load(&self, id: DbId) -> Result<RunRequest, CoreError>;

    /// Persist a new status. Writes to a terminal request are ignored.
    async fn set_status(&self, id: DbId, status: RunStatus) -> Result<(), CoreError>;

    /// Replace the log text wholesale.
    async fn set_logs(&self, id: DbId, logs: &str) -> Result<(), CoreError>;
}

/// Exclusive busy flag per named environment.
///
/// Must be an externally visible compare-and-set: two concurrent
/// `try_acquire` calls for the same environment, from any process, never
/// both return `true`.
#[async_trait]
pub trait EnvironmentLock: Send + Sync {
    /// Flip busy from false to true. Returns `true` iff this call did it.
    async fn try_acquire(&self, environment: &str) -> Result<bool, CoreError>;

    /// Set busy to false. Idempotent.
    async fn release(&self, environment: &str) -> Result<(), CoreError>;
}

/// Work queue that re-submits a dispatch attempt after a delay.
#[async_trait]
pub trait DelayScheduler: Send + Sync {
    async fn schedule(&self, delay: Duration, task: DispatchTask) -> Result<(), CoreError>;
}
