//! Run request entity models and DTOs.

use runbench_core::error::CoreError;
use runbench_core::run::RunRequest;
use runbench_core::run_status::{RunStatus, StatusId};
use runbench_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `run_requests` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunRequestRow {
    pub id: DbId,
    pub requested_by: String,
    pub environment_id: DbId,
    pub status_id: StatusId,
    pub logs: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A run request joined with its environment name and ordered paths.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunRequestDetail {
    pub id: DbId,
    pub requested_by: String,
    pub environment_id: DbId,
    pub environment_name: String,
    pub status_id: StatusId,
    pub logs: String,
    pub paths: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RunRequestDetail {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::from_id(self.status_id)
    }

    /// Convert into the dispatcher's domain type.
    pub fn into_domain(self) -> Result<RunRequest, CoreError> {
        let status = RunStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "Unknown status_id {} on run request {}",
                self.status_id, self.id
            ))
        })?;
        Ok(RunRequest {
            id: self.id,
            requested_by: self.requested_by,
            environment_name: self.environment_name,
            paths: self.paths,
            status,
            logs: self.logs,
            created_at: self.created_at,
        })
    }
}

/// DTO for submitting a new test run.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRunRequest {
    pub requested_by: String,
    pub environment_id: DbId,
    /// Test file path IDs in execution order.
    pub path_ids: Vec<DbId>,
}

/// Query parameters for listing run requests.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequestListQuery {
    /// Filter by status ID.
    pub status_id: Option<StatusId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}
