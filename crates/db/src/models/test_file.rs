use runbench_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `test_file_paths` table. Immutable once created.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TestFilePath {
    pub id: DbId,
    pub path: String,
    pub created_at: Timestamp,
}

/// DTO for registering a test file path.
#[derive(Debug, Deserialize)]
pub struct CreateTestFilePath {
    pub path: String,
}
