//! Repository for the `test_environments` table.
//!
//! `is_busy` is only ever changed by [`EnvironmentRepo::try_acquire`] and
//! [`EnvironmentRepo::release`].

use runbench_core::types::DbId;
use runbench_core::validation::validate_environment_name;
use sqlx::PgPool;

use crate::error::RepoError;
use crate::models::environment::{CreateEnvironment, Environment};

/// Column list for `test_environments` queries.
const COLUMNS: &str = "id, name, is_busy, created_at, updated_at";

/// Provides CRUD and lock operations for test environments.
pub struct EnvironmentRepo;

impl EnvironmentRepo {
    /// Register a new (free) environment. The name goes on the test
    /// runner's command line and must pass [`validate_environment_name`].
    pub async fn create(
        pool: &PgPool,
        input: &CreateEnvironment,
    ) -> Result<Environment, RepoError> {
        validate_environment_name(&input.name)?;

        let query = format!(
            "INSERT INTO test_environments (name) VALUES ($1) RETURNING {COLUMNS}"
        );
        let env = sqlx::query_as::<_, Environment>(&query)
            .bind(&input.name)
            .fetch_one(pool)
            .await?;
        Ok(env)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_environments WHERE id = $1");
        sqlx::query_as::<_, Environment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_name(
        pool: &PgPool,
        name: &str,
    ) -> Result<Option<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_environments WHERE name = $1");
        sqlx::query_as::<_, Environment>(&query)
            .bind(name)
            .fetch_optional(pool)
            .await
    }

    /// List all environments ordered by name.
    pub async fn list(pool: &PgPool) -> Result<Vec<Environment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM test_environments ORDER BY name ASC");
        sqlx::query_as::<_, Environment>(&query)
            .fetch_all(pool)
            .await
    }

    /// Atomically flip `is_busy` from false to true.
    ///
    /// A single conditional UPDATE: the row lock it takes serialises
    /// concurrent callers, and a caller that waited re-checks
    /// `is_busy = false` against the committed row, so at most one of
    /// them matches. Returns `true` iff this call performed the flip.
    pub async fn try_acquire(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
        let acquired = sqlx::query_scalar::<_, DbId>(
            "UPDATE test_environments \
             SET is_busy = true, updated_at = NOW() \
             WHERE name = $1 AND is_busy = false \
             RETURNING id",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;
        Ok(acquired.is_some())
    }

    /// Unconditionally mark the environment free. Idempotent.
    ///
    /// Returns `false` if no environment has this name.
    pub async fn release(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE test_environments SET is_busy = false, updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
