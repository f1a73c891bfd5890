#[cfg(test)]
mod tests {
    use sluice_core::{
        Connection, Executor, IsolationLevel, QueryResult, Value, stream::TryStreamExt,
    };
    use sluice_sqlite::SqliteConnection;
    use sluice_tests::{init_logs, silent_logs};
    use std::{path::Path, sync::Mutex};
    use tokio::fs;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn create_database() {
        init_logs();
        const DB_PATH: &'static str = "../target/debug/creation.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH)
                .await
                .expect(format!("Failed to remove test database file {}", DB_PATH).as_str());
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        SqliteConnection::connect(format!("sqlite://{}?mode=rwc", DB_PATH).into())
            .await
            .expect("Could not open the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        SqliteConnection::connect(format!("sqlite://{}?mode=ro", DB_PATH).into())
            .await
            .expect("Could not open the database");
        fs::remove_file(DB_PATH)
            .await
            .expect(format!("Failed to remove existing test database file {}", DB_PATH).as_str());
        silent_logs! {
            assert!(
                SqliteConnection::connect(format!("sqlite://{}?mode=ro", DB_PATH).into())
                    .await
                    .is_err(),
                "Should not be able to open in read only unexisting database"
            );
        }
    }

    #[tokio::test]
    async fn wrong_url() {
        silent_logs! {
            assert!(
                SqliteConnection::connect("duckdb://some_value".into())
                    .await
                    .is_err()
            );
        };
    }

    #[tokio::test]
    async fn manual_commit() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:".into())
            .await
            .expect("Could not open the database");
        assert!(connection.auto_commit());
        assert!(!connection.in_transaction());
        assert_eq!(connection.isolation(), IsolationLevel::Serializable);
        connection
            .exec("CREATE TABLE t (v INTEGER)".into())
            .await
            .expect("Could not create the table");

        connection
            .set_auto_commit(false)
            .await
            .expect("Could not disable autocommit");
        assert!(connection.in_transaction());
        connection
            .exec("INSERT INTO t VALUES (1)".into())
            .await
            .expect("Could not insert");
        connection.rollback().await.expect("Could not roll back");
        assert!(connection.in_transaction(), "Manual mode keeps a transaction open");
        connection
            .exec("INSERT INTO t VALUES (2)".into())
            .await
            .expect("Could not insert");
        connection.commit().await.expect("Could not commit");
        connection
            .exec("INSERT INTO t VALUES (3)".into())
            .await
            .expect("Could not insert");
        connection
            .set_auto_commit(true)
            .await
            .expect("Could not enable autocommit");
        assert!(!connection.in_transaction());

        let values = connection
            .fetch(&mut "SELECT v FROM t ORDER BY v".into())
            .map_ok(|row| row.values[0].clone())
            .try_collect::<Vec<_>>()
            .await
            .expect("Could not read the values");
        assert_eq!(values, [Value::Int64(2), Value::Int64(3)]);
    }

    #[tokio::test]
    async fn affected_rows() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:".into())
            .await
            .expect("Could not open the database");
        let mut create = "CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER)".into();
        let created = connection
            .execute(&mut create)
            .await
            .expect("Could not create the table");
        assert_eq!(created.rows_affected, 0);
        assert_eq!(created.inserted_id, None);

        let mut insert = connection
            .prepare("INSERT INTO t (v) VALUES (?)".into())
            .await
            .expect("Could not prepare");
        for v in 0..3 {
            insert
                .bind_all(&[Value::Int64(v)])
                .expect("Could not bind");
            let affected = connection
                .execute(&mut insert)
                .await
                .expect("Could not insert");
            assert_eq!(affected.rows_affected, 1);
            assert_eq!(affected.inserted_id, Some(v + 1));
        }
        let results = connection
            .run(&mut "UPDATE t SET v = v + 1 WHERE v > 0".into())
            .try_collect::<Vec<_>>()
            .await
            .expect("Could not update");
        assert!(matches!(
            results.as_slice(),
            [QueryResult::Affected(affected)]
                if affected.rows_affected == 2 && affected.inserted_id.is_none()
        ));
        let deleted = connection
            .execute(&mut "DELETE FROM t WHERE id = 1".into())
            .await
            .expect("Could not delete");
        assert_eq!(deleted.rows_affected, 1);
        assert_eq!(deleted.inserted_id, None);
        insert
            .bind_all(&[Value::Int64(10)])
            .expect("Could not bind");
        let affected = connection
            .execute(&mut insert)
            .await
            .expect("Could not insert");
        assert_eq!(affected.inserted_id, Some(4));
        silent_logs! {
            assert!(connection.prepare("SELECT 1; SELECT 2".into()).await.is_err());
            assert!(connection.prepare("   ".into()).await.is_err());
        }
    }
}
