//! Session pool behaviour against scripted sessions

use quarry_session::testing::{Reply, Script, ScriptedFactory};
use quarry_session::{PoolConfig, SessionPool};
use std::sync::Arc;

fn factory() -> ScriptedFactory {
    ScriptedFactory::new(
        Script::new()
            .on(r"^SELECT @@SESSION\.sql_mode$", Reply::value("@@SESSION.sql_mode", "STRICT_TRANS_TABLES"))
            .on(r"^SELECT @@SESSION\.foreign_key_checks$", Reply::value("@@SESSION.foreign_key_checks", 1i64)),
    )
}

#[tokio::test]
async fn test_variables_saved_and_restored() {
    let factory = factory();
    let pool = SessionPool::open(
        Arc::new(factory.clone()),
        PoolConfig::new(2)
            .with_variable("sql_mode", "''")
            .with_variable("foreign_key_checks", "0")
            .with_init_sql("SET SESSION TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"),
    )
    .await
    .unwrap();
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.matching(r"^SET SESSION sql_mode = ''$").len(), 2);
    assert_eq!(factory.matching(r"READ UNCOMMITTED").len(), 2);

    pool.close().await.unwrap();
    assert_eq!(
        factory.matching(r"^SET SESSION sql_mode = 'STRICT_TRANS_TABLES'$").len(),
        2
    );
    assert_eq!(factory.matching(r"^SET SESSION foreign_key_checks = 1$").len(), 2);
    assert_eq!(factory.closed().len(), 2);
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let factory = factory();
    let pool = Arc::new(
        SessionPool::open(Arc::new(factory.clone()), PoolConfig::new(1))
            .await
            .unwrap(),
    );

    let mut first = pool.acquire().await.unwrap();
    first.execute("SELECT 1").await.unwrap();

    let waiter = Arc::clone(&pool);
    let handle = tokio::spawn(async move { waiter.acquire().await.map(|s| s.connection_id()) });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    let id = first.connection_id();
    pool.release(first);
    assert_eq!(handle.await.unwrap().unwrap(), id);
    assert_eq!(pool.stats().acquired, 2);
}

#[tokio::test]
async fn test_open_failure_closes_opened_sessions() {
    let factory = ScriptedFactory::failing_after(Script::new(), 2);
    let result = SessionPool::open(Arc::new(factory.clone()), PoolConfig::new(3)).await;
    assert!(result.is_err());
    assert_eq!(factory.closed().len(), 2);
}
