//! Repository for the `test_file_paths` table.

use runbench_core::types::DbId;
use runbench_core::validation::validate_test_path;
use sqlx::{PgExecutor, PgPool};

use crate::error::RepoError;
use crate::models::test_file::{CreateTestFilePath, TestFilePath};

/// Column list for `test_file_paths` queries.
const COLUMNS: &str = "id, path, created_at";

pub struct TestFileRepo;

impl TestFileRepo {
    /// Register a test file path.
    ///
    /// The path is handed to the test runner as an argument, so it must
    /// pass [`validate_test_path`]; rejected paths are never inserted.
    pub async fn create(
        pool: &PgPool,
        input: &CreateTestFilePath,
    ) -> Result<TestFilePath, RepoError> {
        validate_test_path(&input.path)?;

        let query = format!("INSERT INTO test_file_paths (path) VALUES ($1) RETURNING {COLUMNS}");
        let file = sqlx::query_as::<_, TestFilePath>(&query)
            .bind(&input.path)
            .fetch_one(pool)
            .await?;
        Ok(file)
    }

    /// Fetch the paths with the given IDs. Missing IDs are simply absent.
    pub async fn find_by_ids<'e>(
        executor: impl PgExecutor<'e>,
        ids: &[DbId],
    ) -> Result<Vec<TestFilePath>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_file_paths WHERE id = ANY($1) ORDER BY id");
        sqlx::query_as::<_, TestFilePath>(&query)
            .bind(ids)
            .fetch_all(executor)
            .await
    }

    /// List all paths ordered by path.
    pub async fn list(pool: &PgPool) -> Result<Vec<TestFilePath>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_file_paths ORDER BY path ASC");
        sqlx::query_as::<_, TestFilePath>(&query)
            .fetch_all(pool)
            .await
    }
}
