use crate::{executor, expect_error_kind, silent_logs};
use sluice::{
    Connection, ErrorKind, ExecutorConfig, IsolationLevel, RowLabeled, Session, StreamOptions,
    params, stream::TryStreamExt,
};

const SELECT: &str = "SELECT id, name FROM cursor_item ORDER BY id";

pub async fn cursor<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 2, ExecutorConfig::default());
    let pool = executor.source().pool().clone();
    let mut scope = executor.detached();
    scope
        .update(
            "CREATE TABLE cursor_item (id INTEGER PRIMARY KEY, name VARCHAR(64) NOT NULL)",
            (),
        )
        .await
        .expect("Could not create cursor_item");
    scope
        .batch_update(
            "INSERT INTO cursor_item (id, name) VALUES (?, ?)",
            (1..=20).map(|i| params![i, format!("row {}", i)]),
        )
        .await
        .expect("Could not fill cursor_item");

    // Nothing is acquired until the first pull
    let before = pool.stats();
    let mut cursor = executor
        .detached()
        .stream(SELECT, (), StreamOptions::new())
        .expect("Could not create the cursor");
    assert!(!cursor.is_started());
    assert_eq!(pool.stats(), before);
    assert!(cursor.has_next().await.expect("Could not peek"));
    assert!(cursor.has_next().await.expect("Could not peek"));
    assert!(cursor.is_started());
    assert_eq!(pool.stats().in_use(), 1);
    assert_eq!(
        cursor
            .next_as::<(i64, String)>()
            .await
            .expect("Could not read"),
        Some((1, "row 1".to_string()))
    );
    assert_eq!(cursor.skip(3).await.expect("Could not skip"), 3);
    assert_eq!(
        cursor.next_as::<i64>().await.expect("Could not read"),
        Some(5)
    );
    cursor.close();
    cursor.close();
    assert!(cursor.is_closed());
    assert_eq!(pool.stats().in_use(), 0);
    assert!(cursor.next().await.expect("A closed cursor is empty").is_none());
    assert_eq!(pool.stats().in_use(), 0);

    // Offset and row cap, released once exhausted
    let mut cursor = executor
        .detached()
        .stream(
            SELECT,
            (),
            StreamOptions::new().with_offset(5).with_max_rows(10),
        )
        .expect("Could not create the cursor");
    assert_eq!(
        cursor.next_as::<i64>().await.expect("Could not read"),
        Some(6)
    );
    assert_eq!(cursor.count().await.expect("Could not count"), 9);
    assert!(cursor.is_closed());
    assert_eq!(pool.stats().in_use(), 0);

    let mut cursor = executor
        .detached()
        .stream(SELECT, (), StreamOptions::new().with_offset(25))
        .expect("Could not create the cursor");
    assert!(!cursor.has_next().await.expect("Could not peek"));
    assert!(cursor.is_closed());

    let mut cursor = executor
        .detached()
        .stream(SELECT, (), StreamOptions::new())
        .expect("Could not create the cursor");
    assert_eq!(cursor.skip(100).await.expect("Could not skip"), 20);
    assert!(cursor.is_closed());

    // Dropping a cursor midway gives the connection back
    {
        let mut cursor = executor
            .detached()
            .stream(SELECT, (), StreamOptions::new())
            .expect("Could not create the cursor");
        cursor.next().await.expect("Could not read");
        assert_eq!(pool.stats().in_use(), 1);
    }
    assert_eq!(pool.stats().in_use(), 0);

    let rows = executor
        .detached()
        .stream(
            "SELECT id FROM cursor_item WHERE id > ?",
            params![15],
            StreamOptions::new(),
        )
        .expect("Could not create the cursor")
        .into_stream()
        .try_collect::<Vec<RowLabeled>>()
        .await
        .expect("Could not collect the rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(pool.stats().in_use(), 0);

    // Failures close the cursor
    let mut cursor = executor
        .detached()
        .stream("SELECT * FROM missing_table", (), StreamOptions::new())
        .expect("The statement is only checked when the cursor starts");
    silent_logs! {
        assert!(cursor.has_next().await.is_err());
    }
    assert!(cursor.is_closed());
    assert_eq!(pool.stats().in_use(), 0);
    assert!(matches!(
        expect_error_kind(executor.detached().stream(
            "SELECT * FROM cursor_item WHERE id = ?",
            (),
            StreamOptions::new()
        )),
        ErrorKind::InvalidArgument(..)
    ));

    // Inside a transaction the cursor sees its changes, unless asked to stay outside
    let session = Session::new();
    let mut transaction = executor
        .begin(&session, IsolationLevel::Default, false)
        .await
        .expect("Could not begin");
    executor
        .session(&session)
        .update(
            "INSERT INTO cursor_item (id, name) VALUES (?, ?)",
            params![21, "row 21"],
        )
        .await
        .expect("Could not insert");
    let mut outside = executor
        .session(&session)
        .stream(SELECT, (), StreamOptions::new().outside_transaction())
        .expect("Could not create the cursor");
    assert_eq!(outside.count().await.expect("Could not count"), 20);
    let mut inside = executor
        .session(&session)
        .stream(SELECT, (), StreamOptions::new())
        .expect("Could not create the cursor");
    assert_eq!(inside.count().await.expect("Could not count"), 21);

    // An open cursor holds the transaction connection, the rest of the transaction fails fast
    let mut inside = executor
        .session(&session)
        .stream(SELECT, (), StreamOptions::new())
        .expect("Could not create the cursor");
    assert!(inside.next().await.expect("Could not read").is_some());
    assert!(transaction.context().is_streaming());
    assert_eq!(
        expect_error_kind(
            executor
                .session(&session)
                .update(
                    "INSERT INTO cursor_item (id, name) VALUES (?, ?)",
                    params![22, "row 22"],
                )
                .await
        ),
        ErrorKind::Busy(transaction.id())
    );
    assert_eq!(
        expect_error_kind(
            executor
                .session(&session)
                .fetch_one::<i64>("SELECT COUNT(*) FROM cursor_item", ())
                .await
        ),
        ErrorKind::Busy(transaction.id())
    );
    assert_eq!(
        expect_error_kind(transaction.commit().await),
        ErrorKind::Busy(transaction.id())
    );
    assert!(!transaction.is_finished());
    assert_eq!(transaction.context().ref_count(), 1);
    let mut other = executor
        .session(&session)
        .stream(SELECT, (), StreamOptions::new())
        .expect("Could not create the cursor");
    assert_eq!(
        expect_error_kind(other.next().await),
        ErrorKind::Busy(transaction.id())
    );
    assert!(other.is_closed());
    inside.close();
    assert!(!transaction.context().is_streaming());
    assert_eq!(
        executor
            .session(&session)
            .fetch_one::<i64>("SELECT COUNT(*) FROM cursor_item", ())
            .await
            .expect("Could not count once the cursor is closed"),
        Some(21)
    );
    transaction
        .rollback_if_not_committed()
        .await
        .expect("Could not roll back");
    assert_eq!(pool.stats().in_use(), 0);

    // On a caller connection
    let mut connection = C::connect(url.to_string().into())
        .await
        .expect("Could not connect");
    {
        let mut cursor = executor
            .connection(&mut connection)
            .stream(SELECT, (), StreamOptions::new().with_max_rows(3))
            .expect("Could not create the cursor");
        assert_eq!(cursor.count().await.expect("Could not count"), 3);
    }
    let count = executor
        .connection(&mut connection)
        .fetch_one::<i64>("SELECT COUNT(*) FROM cursor_item", ())
        .await
        .expect("The caller connection must still be usable");
    assert_eq!(count, Some(20));
}
