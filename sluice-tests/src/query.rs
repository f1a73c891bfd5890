use crate::{executor, expect_error_kind, silent_logs};
use sluice::{
    All, Connection, Cursor, ErrorKind, ExecutorConfig, Paging, Value, named_params, params,
};

pub async fn query<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 2, ExecutorConfig::default());
    let pool = executor.source().pool().clone();
    let mut scope = executor.detached();
    scope
        .update(
            "CREATE TABLE query_item (id INTEGER PRIMARY KEY, name VARCHAR(64) NOT NULL, price DOUBLE NOT NULL)",
            (),
        )
        .await
        .expect("Could not create query_item");

    // Placeholders
    let pen = scope
        .insert(
            "INSERT INTO query_item (name, price) VALUES (:name, :price)",
            named_params! { "name" => "pen", "price" => 1.5 },
        )
        .await
        .expect("Could not insert pen")
        .expect("The insert must return the generated key");
    let ink = scope
        .insert(
            "INSERT INTO query_item (name, price) VALUES (#{name}, #{price})",
            named_params! { "price" => 2.5, "name" => "ink" },
        )
        .await
        .expect("Could not insert ink")
        .expect("The insert must return the generated key");
    assert!(ink > pen);
    scope
        .insert(
            "INSERT INTO query_item (name, price) VALUES (?, ?)",
            params!["pad", 4.0],
        )
        .await
        .expect("Could not insert pad");

    let updated = scope
        .update(
            "UPDATE query_item SET price = price * 2 WHERE price > ?",
            params![2.0],
        )
        .await
        .expect("Could not update the prices");
    assert_eq!(updated, 2);
    let key = scope
        .insert("UPDATE query_item SET name = name WHERE id = ?", params![1])
        .await
        .expect("Could not update the name");
    assert_eq!(key, None, "An update does not generate a key");

    // Extraction
    let names = scope
        .fetch_all::<String>("SELECT name FROM query_item ORDER BY id", ())
        .await
        .expect("Could not fetch the names");
    assert_eq!(names, ["pen", "ink", "pad"]);
    let page = scope
        .query_paged(
            "SELECT id, name FROM query_item ORDER BY id",
            (),
            Paging::new(1, Some(1)),
            All::<(i64, String)>::new(),
        )
        .await
        .expect("Could not fetch the page");
    assert_eq!(page, [(ink, "ink".to_string())]);
    let table = scope
        .fetch_table("SELECT name, price FROM query_item ORDER BY id", ())
        .await
        .expect("Could not fetch the table");
    assert_eq!(table.len(), 3);
    assert_eq!(table.column_index("price"), Some(1));
    assert_eq!(table.get(2, "price"), Some(&Value::Float64(8.0)));
    assert_eq!(table.get(0, "name"), Some(&Value::Varchar("pen".into())));
    let missing = scope
        .fetch_one::<String>("SELECT name FROM query_item WHERE id = ?", params![-1])
        .await
        .expect("Could not run the query");
    assert_eq!(missing, None);
    let count = scope
        .fetch_one::<i64>("SELECT COUNT(*) FROM query_item", ())
        .await
        .expect("Could not count");
    assert_eq!(count, Some(3));

    // Rejected before any connection is borrowed
    let before = pool.stats();
    assert!(matches!(
        expect_error_kind(scope.query("SELECT * FROM query_item", (), Cursor).await),
        ErrorKind::Unsupported(..)
    ));
    assert!(matches!(
        expect_error_kind(
            scope
                .update("UPDATE query_item SET name = ? WHERE id = ?", params!["x"])
                .await
        ),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(
            scope
                .update("UPDATE query_item SET name = :name", named_params! { "other" => 1 })
                .await
        ),
        ErrorKind::InvalidArgument(..)
    ));
    assert_eq!(pool.stats().borrowed, before.borrowed);

    // Driver failures carry the statement
    silent_logs! {
        let error = scope
            .update("UPDATE missing_table SET a = 1", ())
            .await
            .unwrap_err();
        assert!(format!("{:#}", error).contains("missing_table"));
    }
    assert_eq!(pool.stats().in_use(), 0);

    // Read only
    let read_only = crate::executor::<C>(url, 1, ExecutorConfig::default().with_read_only(true));
    let mut scope = read_only.detached();
    let count = scope
        .fetch_one::<i64>("SELECT COUNT(*) FROM query_item", ())
        .await
        .expect("Reads are allowed on a read-only executor");
    assert_eq!(count, Some(3));
    silent_logs! {
        assert!(matches!(
            expect_error_kind(scope.update("DELETE FROM query_item", ()).await),
            ErrorKind::ReadOnly(..)
        ));
        assert!(matches!(
            expect_error_kind(
                scope
                    .insert("INSERT INTO query_item (name, price) VALUES (?, ?)", params!["x", 1])
                    .await
            ),
            ErrorKind::ReadOnly(..)
        ));
        assert!(matches!(
            expect_error_kind(
                scope
                    .batch_update("DELETE FROM query_item WHERE id = ?", [params![pen]])
                    .await
            ),
            ErrorKind::ReadOnly(..)
        ));
        assert!(matches!(
            expect_error_kind(read_only.sequence("query_seq", "id", 1, 10).await),
            ErrorKind::ReadOnly(..)
        ));
        assert!(matches!(
            expect_error_kind(read_only.row_lock("query_lock").await),
            ErrorKind::ReadOnly(..)
        ));
    }
    assert_eq!(read_only.source().pool().stats().borrowed, 1);
    let count = executor
        .detached()
        .fetch_one::<i64>("SELECT COUNT(*) FROM query_item", ())
        .await
        .expect("Could not count");
    assert_eq!(count, Some(3));
}
