//! Error type for repository writes that validate their input.

use runbench_core::error::CoreError;

/// Errors from repository operations that reject bad input before
/// touching the database.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
