use crate::{executor, expect_error_kind, silent_logs};
use sluice::{Connection, ErrorKind, ExecutorConfig, IsolationLevel, Params, params};

const INSERT: &str = "INSERT INTO batch_item (name, qty) VALUES (?, ?)";

pub async fn batch<C: Connection>(url: &str) {
    // A single connection, so every pooled operation reuses the one the batches ran on
    let executor = executor::<C>(url, 1, ExecutorConfig::default().with_batch_size(10));
    let pool = executor.source().pool().clone();
    let mut scope = executor.detached();
    scope
        .update(
            "CREATE TABLE batch_item (id INTEGER PRIMARY KEY, name VARCHAR(64) NOT NULL UNIQUE, qty INTEGER NOT NULL)",
            (),
        )
        .await
        .expect("Could not create batch_item");

    // 25 sets in chunks of 10
    let outcome = scope
        .batch_insert(INSERT, (0..25).map(|i| params![format!("item {}", i), i]))
        .await
        .expect("Could not run the batch");
    assert_eq!(outcome.affected, vec![1; 25]);
    assert_eq!(outcome.total(), 25);
    assert_eq!(outcome.generated_keys.len(), 25);
    assert!(outcome.generated_keys.windows(2).all(|w| w[0] < w[1]));
    let stored = scope
        .fetch_all::<i64>("SELECT id FROM batch_item ORDER BY id", ())
        .await
        .expect("Could not read the ids");
    assert_eq!(stored, outcome.generated_keys);

    let outcome = scope
        .batch_update(
            "UPDATE batch_item SET qty = qty + ? WHERE qty < ?",
            [params![100, 5], params![1000, 0], params![100, 10]],
        )
        .await
        .expect("Could not run the update batch");
    assert_eq!(outcome.affected, [5, 0, 5]);
    assert!(outcome.generated_keys.is_empty());

    // A failure in the last chunk leaves nothing behind
    let failing = (0..25).map(|i| {
        let name = if i == 22 {
            "item 3".to_string()
        } else {
            format!("other {}", i)
        };
        params![name, i]
    });
    silent_logs! {
        assert!(scope.batch_update(INSERT, failing).await.is_err());
    }
    let others = scope
        .fetch_one::<i64>("SELECT COUNT(*) FROM batch_item WHERE name LIKE ?", params!["other%"])
        .await
        .expect("Could not count");
    assert_eq!(others, Some(0));
    {
        let lease = executor
            .broker()
            .borrow()
            .await
            .expect("Could not borrow a connection");
        assert!(lease.auto_commit(), "The batch must restore autocommit");
    }
    assert_eq!(pool.stats().in_use(), 0);
    assert_eq!(pool.stats().discarded, 0);

    // The isolation switched for the batch is restored, on success and on failure
    let isolated = crate::executor::<C>(
        url,
        1,
        ExecutorConfig::default()
            .with_batch_size(10)
            .with_default_isolation(IsolationLevel::ReadUncommitted),
    );
    let original = {
        let lease = isolated
            .broker()
            .borrow()
            .await
            .expect("Could not borrow a connection");
        (lease.isolation(), lease.auto_commit())
    };
    assert_ne!(original.0, IsolationLevel::ReadUncommitted);
    let outcome = isolated
        .detached()
        .batch_update(INSERT, (0..15).map(|i| params![format!("isolated {}", i), i]))
        .await
        .expect("Could not run the isolated batch");
    assert_eq!(outcome.total(), 15);
    {
        let lease = isolated
            .broker()
            .borrow()
            .await
            .expect("Could not borrow a connection");
        assert_eq!((lease.isolation(), lease.auto_commit()), original);
    }
    let failing = (0..15).map(|i| {
        let name = if i == 12 {
            "isolated 0".to_string()
        } else {
            format!("isolated again {}", i)
        };
        params![name, i]
    });
    silent_logs! {
        assert!(isolated.detached().batch_update(INSERT, failing).await.is_err());
    }
    {
        let lease = isolated
            .broker()
            .borrow()
            .await
            .expect("Could not borrow a connection");
        assert_eq!((lease.isolation(), lease.auto_commit()), original);
    }
    assert_eq!(isolated.source().pool().stats().discarded, 0);
    let again = scope
        .fetch_one::<i64>(
            "SELECT COUNT(*) FROM batch_item WHERE name LIKE ?",
            params!["isolated again%"],
        )
        .await
        .expect("Could not count");
    assert_eq!(again, Some(0));

    // A single chunk runs without a transaction of its own
    let outcome = scope
        .batch(INSERT, [params!["single a", 1], params!["single b", 2]], 5, false)
        .await
        .expect("Could not run the small batch");
    assert_eq!(outcome.total(), 2);

    assert!(matches!(
        expect_error_kind(scope.batch_update(INSERT, Vec::<Params>::new()).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(scope.batch(INSERT, [params!["zero", 0]], 0, false).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(scope.batch_update(INSERT, [params!["short"]]).await),
        ErrorKind::InvalidArgument(..)
    ));

    // Connections owned by the caller are never reconfigured
    let mut connection = C::connect(url.to_string().into())
        .await
        .expect("Could not connect");
    {
        let mut scope = executor.connection(&mut connection);
        let failing = (0..15).map(|i| {
            let name = if i == 12 {
                "item 0".to_string()
            } else {
                format!("caller {}", i)
            };
            params![name, i]
        });
        silent_logs! {
            assert!(scope.batch_update(INSERT, failing).await.is_err());
        }
    }
    assert!(connection.auto_commit());
    let applied = executor
        .connection(&mut connection)
        .fetch_one::<i64>(
            "SELECT COUNT(*) FROM batch_item WHERE name LIKE ?",
            params!["caller%"],
        )
        .await
        .expect("The caller connection must still be usable")
        .expect("COUNT returns a row");
    // In autocommit every set that ran before the failure stays applied
    assert!((10..15).contains(&applied), "applied {}", applied);
}
