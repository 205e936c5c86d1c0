//! Test environment entity: a named, exclusively lockable execution target.

use runbench_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `test_environments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Environment {
    pub id: DbId,
    pub name: String,
    pub is_busy: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a new environment.
#[derive(Debug, Deserialize)]
pub struct CreateEnvironment {
    pub name: String,
}
