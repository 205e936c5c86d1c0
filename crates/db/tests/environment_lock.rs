//! Integration tests for the `test_environments.is_busy` lock.

use assert_matches::assert_matches;
use runbench_core::error::CoreError;
use runbench_core::store::EnvironmentLock;
use runbench_db::models::environment::CreateEnvironment;
use runbench_db::repositories::EnvironmentRepo;
use runbench_db::PgEnvironmentLock;
use sqlx::PgPool;

async fn create_env(pool: &PgPool, name: &str) {
    EnvironmentRepo::create(
        pool,
        &CreateEnvironment {
            name: name.to_string(),
        },
    )
    .await
    .unwrap();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_new_environment_is_free(pool: PgPool) {
    create_env(&pool, "staging").await;
    let env = EnvironmentRepo::find_by_name(&pool, "staging")
        .await
        .unwrap()
        .unwrap();
    assert!(!env.is_busy);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_acquire_then_acquire_again_fails(pool: PgPool) {
    create_env(&pool, "staging").await;

    assert!(EnvironmentRepo::try_acquire(&pool, "staging").await.unwrap());
    assert!(!EnvironmentRepo::try_acquire(&pool, "staging").await.unwrap());

    let env = EnvironmentRepo::find_by_name(&pool, "staging")
        .await
        .unwrap()
        .unwrap();
    assert!(env.is_busy);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_release_is_idempotent(pool: PgPool) {
    create_env(&pool, "staging").await;

    assert!(EnvironmentRepo::try_acquire(&pool, "staging").await.unwrap());
    assert!(EnvironmentRepo::release(&pool, "staging").await.unwrap());
    assert!(EnvironmentRepo::release(&pool, "staging").await.unwrap());

    // Free again after a double release.
    assert!(EnvironmentRepo::try_acquire(&pool, "staging").await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_concurrent_acquire_has_one_winner(pool: PgPool) {
    create_env(&pool, "staging").await;

    let attempts = (0..8).map(|_| {
        let pool = pool.clone();
        tokio::spawn(async move { EnvironmentRepo::try_acquire(&pool, "staging").await })
    });
    let results = futures::future::join_all(attempts).await;

    let winners = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|acquired| *acquired)
        .count();
    assert_eq!(winners, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_locks_are_per_environment(pool: PgPool) {
    create_env(&pool, "env-a").await;
    create_env(&pool, "env-b").await;

    assert!(EnvironmentRepo::try_acquire(&pool, "env-a").await.unwrap());
    assert!(EnvironmentRepo::try_acquire(&pool, "env-b").await.unwrap());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_adapter_reports_unknown_environment(pool: PgPool) {
    let lock = PgEnvironmentLock::new(pool.clone());

    assert_matches!(
        lock.try_acquire("nowhere").await,
        Err(CoreError::EnvironmentNotFound(name)) if name == "nowhere"
    );
    assert_matches!(
        lock.release("nowhere").await,
        Err(CoreError::EnvironmentNotFound(_))
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_adapter_busy_is_not_an_error(pool: PgPool) {
    create_env(&pool, "staging").await;
    let lock = PgEnvironmentLock::new(pool.clone());

    assert!(lock.try_acquire("staging").await.unwrap());
    assert!(!lock.try_acquire("staging").await.unwrap());
    lock.release("staging").await.unwrap();
    assert!(lock.try_acquire("staging").await.unwrap());
}
