use crate::{executor, expect_error_kind, silent_logs};
use sluice::{
    Connection, ConnectionPool, ErrorKind, ExecutorConfig, IsolationLevel, Pool, Session,
    SqlExecutor, TransactionStatus, params,
};
use std::time::Duration;
use tokio::time::sleep;

async fn committed<P: ConnectionPool>(executor: &SqlExecutor<P>, pattern: &str) -> i64 {
    executor
        .detached()
        .fetch_one::<i64>(
            "SELECT COUNT(*) FROM tx_item WHERE name LIKE ?",
            params![pattern],
        )
        .await
        .expect("Could not count")
        .expect("COUNT returns a row")
}

async fn insert<P: ConnectionPool>(executor: &SqlExecutor<P>, session: &Session, name: &str) {
    executor
        .session(session)
        .insert("INSERT INTO tx_item (name) VALUES (?)", params![name])
        .await
        .expect("Could not insert");
}

pub async fn transaction<C: Connection>(url: &str) {
    let executor: SqlExecutor<Pool<C>> = executor::<C>(url, 2, ExecutorConfig::default());
    let pool = executor.source().pool().clone();
    let source = executor.source().id();
    executor
        .detached()
        .update(
            "CREATE TABLE tx_item (id INTEGER PRIMARY KEY, name VARCHAR(64) NOT NULL)",
            (),
        )
        .await
        .expect("Could not create tx_item");

    // Nested begins join the same transaction, the outermost completion decides
    let session = Session::new();
    let mut outer = executor
        .begin(&session, IsolationLevel::Serializable, false)
        .await
        .expect("Could not begin");
    let mut inner = executor
        .begin(&session, IsolationLevel::ReadUncommitted, false)
        .await
        .expect("Could not join");
    assert_eq!(outer.id(), inner.id());
    assert_eq!(outer.context().ref_count(), 2);
    assert_eq!(inner.context().isolation(), IsolationLevel::Serializable);
    assert_eq!(inner.requested_isolation(), IsolationLevel::ReadUncommitted);
    assert!(session.has_transaction(source));
    assert_eq!(pool.stats().in_use(), 1);
    insert(&executor, &session, "join a").await;
    insert(&executor, &session, "join b").await;
    assert_eq!(pool.stats().in_use(), 1);
    let inside = executor
        .session(&session)
        .fetch_one::<i64>(
            "SELECT COUNT(*) FROM tx_item WHERE name LIKE ?",
            params!["join%"],
        )
        .await
        .expect("Could not count");
    assert_eq!(inside, Some(2));
    assert_eq!(committed(&executor, "join%").await, 0);
    inner.commit().await.expect("Could not commit the inner participant");
    assert_eq!(outer.context().status(), TransactionStatus::Active);
    assert_eq!(committed(&executor, "join%").await, 0);
    outer.commit().await.expect("Could not commit");
    assert_eq!(outer.context().status(), TransactionStatus::Committed);
    assert_eq!(committed(&executor, "join%").await, 2);
    assert!(!session.has_transaction(source));
    assert_eq!(pool.stats().in_use(), 0);

    // Completing twice is harmless
    outer.commit().await.expect("A second commit does nothing");
    outer
        .rollback_if_not_committed()
        .await
        .expect("Rollback after commit does nothing");
    inner
        .rollback_if_not_committed()
        .await
        .expect("Rollback after commit does nothing");
    assert_eq!(committed(&executor, "join%").await, 2);

    // A nested rollback dooms the whole transaction
    let mut outer = executor
        .begin(&session, IsolationLevel::Default, false)
        .await
        .expect("Could not begin");
    let mut inner = executor
        .begin(&session, IsolationLevel::Default, false)
        .await
        .expect("Could not join");
    insert(&executor, &session, "nested a").await;
    inner
        .rollback_if_not_committed()
        .await
        .expect("Could not leave the transaction");
    assert_eq!(outer.context().status(), TransactionStatus::MarkedRollback);
    assert_eq!(
        expect_error_kind(
            executor
                .begin(&session, IsolationLevel::Default, false)
                .await
        ),
        ErrorKind::Inactive(outer.id())
    );
    assert_eq!(outer.context().ref_count(), 1);
    assert_eq!(
        expect_error_kind(outer.commit().await),
        ErrorKind::RolledBack(outer.id())
    );
    assert_eq!(outer.context().status(), TransactionStatus::RolledBack);
    outer
        .rollback_if_not_committed()
        .await
        .expect("Rollback after completion does nothing");
    assert_eq!(committed(&executor, "nested%").await, 0);
    assert!(!session.has_transaction(source));
    assert_eq!(pool.stats().in_use(), 0);

    // Plain rollback
    let mut transaction = executor
        .begin(&session, IsolationLevel::ReadUncommitted, false)
        .await
        .expect("Could not begin");
    insert(&executor, &session, "rolled back").await;
    transaction
        .rollback_if_not_committed()
        .await
        .expect("Could not roll back");
    assert_eq!(committed(&executor, "rolled back").await, 0);

    // Sessions are independent
    let other = Session::new();
    let mut first = executor
        .begin(&session, IsolationLevel::Default, false)
        .await
        .expect("Could not begin");
    let mut second = executor
        .begin(&other, IsolationLevel::Default, true)
        .await
        .expect("Could not begin");
    assert_ne!(first.id(), second.id());
    assert_eq!(pool.stats().in_use(), 2);
    first.commit().await.expect("Could not commit");
    second.commit().await.expect("Could not commit");

    // A handle dropped while open rolls back
    silent_logs! {
        {
            let _forgotten = executor
                .begin(&session, IsolationLevel::Default, false)
                .await
                .expect("Could not begin");
            insert(&executor, &session, "dropped").await;
        }
        for _ in 0..200 {
            if !session.has_transaction(source) && pool.stats().in_use() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
    assert!(!session.has_transaction(source));
    assert_eq!(pool.stats().in_use(), 0);
    assert_eq!(committed(&executor, "dropped").await, 0);

    // Connections go back to the pool as they were taken
    let a = executor.broker().borrow().await.expect("Could not borrow");
    let b = executor.broker().borrow().await.expect("Could not borrow");
    assert!(a.auto_commit() && b.auto_commit());
    assert_eq!(a.isolation(), b.isolation());
    assert_eq!(pool.stats().discarded, 0);
}
