//! Queued dispatch attempts.

use runbench_core::run::DispatchTask;
use runbench_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `dispatch_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchJob {
    pub id: DbId,
    pub run_request_id: DbId,
    pub retry_count: i32,
    pub run_after: Timestamp,
    pub created_at: Timestamp,
}

impl DispatchJob {
    /// The dispatcher's view of this message.
    pub fn task(&self) -> DispatchTask {
        DispatchTask {
            run_request_id: self.run_request_id,
            retry_count: u32::try_from(self.retry_count).unwrap_or(0),
        }
    }
}
