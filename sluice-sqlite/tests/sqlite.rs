#[cfg(test)]
mod tests {
    use sluice_core::{ErrorKind, ExecutorConfig, KeyCountPolicy, params};
    use sluice_sqlite::SqliteConnection;
    use sluice_tests::{execute_tests, executor, expect_error_kind, init_logs, silent_logs};
    use std::{env, path::Path, sync::Mutex};
    use tokio::fs;
    use uuid::Uuid;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sqlite() {
        init_logs();
        const DB_PATH: &'static str = "../target/debug/tests.sqlite";
        let _guard = MUTEX.lock().unwrap();
        for path in [DB_PATH, "../target/debug/tests.sqlite-wal", "../target/debug/tests.sqlite-shm"] {
            if Path::new(path).exists() {
                fs::remove_file(path)
                    .await
                    .expect(format!("Failed to remove existing test database file {}", path).as_str());
            }
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        execute_tests::<SqliteConnection>(&format!("sqlite://{}?mode=rwc", DB_PATH)).await;
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created by the tests"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn key_count_policy() {
        init_logs();
        let path = env::temp_dir().join(format!("sluice-{}.sqlite", Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let insert = "INSERT OR IGNORE INTO tag (name) VALUES (?)";
        {
            let warn = executor::<SqliteConnection>(&url, 1, ExecutorConfig::default());
            let mut scope = warn.detached();
            scope
                .update(
                    "CREATE TABLE tag (id INTEGER PRIMARY KEY, name VARCHAR(32) NOT NULL UNIQUE)",
                    (),
                )
                .await
                .expect("Could not create tag");
            silent_logs! {
                let outcome = scope
                    .batch_insert(insert, [params!["red"], params!["red"], params!["blue"]])
                    .await
                    .expect("A short key count is only a warning by default");
                assert_eq!(outcome.affected, [1, 0, 1]);
                assert_eq!(outcome.generated_keys.len(), 2);
            }

            let fail = executor::<SqliteConnection>(
                &url,
                1,
                ExecutorConfig::default().with_key_count_policy(KeyCountPolicy::Fail),
            );
            assert_eq!(
                expect_error_kind(
                    fail.detached()
                        .batch_insert(insert, [params!["green"], params!["red"]])
                        .await
                ),
                ErrorKind::KeyCountMismatch {
                    expected: 2,
                    actual: 1
                }
            );
            // The rows were written before the mismatch was reported
            let green = scope
                .fetch_one::<i64>("SELECT COUNT(*) FROM tag WHERE name = ?", params!["green"])
                .await
                .expect("Could not count");
            assert_eq!(green, Some(1));
        }
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn query_timeout() {
        init_logs();
        let path = env::temp_dir().join(format!("sluice-{}.sqlite", Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        {
            let executor = executor::<SqliteConnection>(
                &url,
                1,
                ExecutorConfig::default().with_query_timeout(std::time::Duration::from_millis(250)),
            );
            let value = executor
                .detached()
                .fetch_one::<String>("SELECT 'ok'", ())
                .await
                .expect("Could not run the query");
            assert_eq!(value.as_deref(), Some("ok"));
        }
        let _ = fs::remove_file(&path).await;
    }
}
