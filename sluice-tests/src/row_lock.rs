use crate::{executor, expect_error_kind};
use sluice::{Connection, ErrorKind, ExecutorConfig};
use std::time::Duration;
use tokio::time::sleep;

pub async fn row_lock<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 2, ExecutorConfig::default());
    let locks = executor
        .row_lock("lock_tbl")
        .await
        .expect("Could not create the lock table");
    let expire = Duration::from_secs(60);

    let token = locks
        .try_lock("job", expire)
        .await
        .expect("Could not try the lock")
        .expect("The lock is free");
    assert!(
        locks
            .try_lock("job", expire)
            .await
            .expect("Could not try the lock")
            .is_none()
    );
    assert_eq!(
        locks.holder("job").await.expect("Could not read the holder"),
        Some(token.clone())
    );
    assert!(
        !locks
            .unlock("job", "someone else")
            .await
            .expect("Could not unlock")
    );
    assert!(locks.refresh("job", &token).await.expect("Could not refresh"));
    assert!(locks.unlock("job", &token).await.expect("Could not unlock"));
    assert!(!locks.unlock("job", &token).await.expect("Could not unlock"));
    assert_eq!(
        locks.holder("job").await.expect("Could not read the holder"),
        None
    );
    assert!(!locks.refresh("job", &token).await.expect("Could not refresh"));

    // Locks are independent, and the same table can be opened twice
    let again = executor
        .row_lock("lock_tbl")
        .await
        .expect("Could not open the lock table");
    let a = again
        .try_lock("a", expire)
        .await
        .expect("Could not try the lock");
    let b = locks
        .try_lock("b", expire)
        .await
        .expect("Could not try the lock");
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b);

    // A holder that stopped refreshing loses the lock
    let stale = locks
        .try_lock("stale", expire)
        .await
        .expect("Could not try the lock")
        .expect("The lock is free");
    sleep(Duration::from_millis(50)).await;
    let taken = locks
        .try_lock("stale", Duration::from_millis(10))
        .await
        .expect("Could not try the lock")
        .expect("The abandoned lock must be taken over");
    assert_ne!(stale, taken);
    assert!(!locks.refresh("stale", &stale).await.expect("Could not refresh"));
    assert!(locks.refresh("stale", &taken).await.expect("Could not refresh"));

    // Polling
    let held = locks
        .lock(
            "poll",
            expire,
            Duration::from_millis(500),
            Duration::from_millis(20),
        )
        .await
        .expect("Could not lock")
        .expect("The lock is free");
    let waited = locks
        .lock(
            "poll",
            expire,
            Duration::from_millis(100),
            Duration::from_millis(20),
        )
        .await
        .expect("Could not lock");
    assert!(waited.is_none());
    assert!(locks.unlock("poll", &held).await.expect("Could not unlock"));
    assert!(
        locks
            .lock("poll", expire, Duration::ZERO, Duration::from_millis(20))
            .await
            .expect("Could not lock")
            .is_some()
    );

    assert!(matches!(
        expect_error_kind(locks.try_lock("", expire).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(locks.try_lock("job", Duration::ZERO).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(locks.unlock("job", "").await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(executor.row_lock(" ").await),
        ErrorKind::InvalidArgument(..)
    ));
    assert_eq!(executor.source().pool().stats().in_use(), 0);
}
