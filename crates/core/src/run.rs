//! Domain view of a run request as the dispatcher sees it.

use serde::{Deserialize, Serialize};

use crate::run_status::RunStatus;
use crate::types::{DbId, Timestamp};

/// A run request with its environment resolved to a name and its test
/// file paths in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub id: DbId,
    pub requested_by: String,
    pub environment_name: String,
    pub paths: Vec<String>,
    pub status: RunStatus,
    pub logs: String,
    pub created_at: Timestamp,
}

/// One queued dispatch attempt: the self-rescheduling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub run_request_id: DbId,
    pub retry_count: u32,
}

impl DispatchTask {
    /// The first attempt for a freshly persisted run request.
    pub fn initial(run_request_id: DbId) -> Self {
        Self {
            run_request_id,
            retry_count: 0,
        }
    }
}
