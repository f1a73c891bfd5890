#[cfg(test)]
mod tests {
    use sluice::{
        ConnectionPool, DataSource, ErrorKind, ExecutorConfig, IsolationLevel, Pool, PoolConfig,
        SqlExecutor, error_kind,
    };
    use sluice_sqlite::SqliteConnection;
    use std::time::Duration;

    #[test]
    fn pool_from_url() {
        let config = PoolConfig::from_url(
            "sqlite://data.db?mode=rwc&pool_max_size=3&pool_acquire_timeout_ms=1500&cache=shared",
        )
        .unwrap();
        assert_eq!(config.url, "sqlite://data.db?mode=rwc&cache=shared");
        assert_eq!(config.max_size, 3);
        assert_eq!(config.acquire_timeout, Duration::from_millis(1500));

        let config = PoolConfig::from_url("sqlite://data.db").unwrap();
        assert_eq!(config, PoolConfig::new("sqlite://data.db"));

        let config = PoolConfig::from_url("sqlite://data.db?pool_max_size=2").unwrap();
        assert_eq!(config.url, "sqlite://data.db");

        assert!(PoolConfig::from_url("sqlite://data.db?pool_max_size=many").is_err());
        let error = PoolConfig::from_url("sqlite://data.db?pool_max_size=0").unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(ErrorKind::InvalidArgument(..))
        ));
    }

    #[test]
    fn executor_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.default_isolation, IsolationLevel::Default);
        assert!(!config.read_only);
        assert!(config.validate().is_ok());
        assert!(ExecutorConfig::new().with_batch_size(0).validate().is_err());
        assert!(
            ExecutorConfig::new()
                .with_query_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        let pool = Pool::<SqliteConnection>::new(PoolConfig::new("sqlite://:memory:")).unwrap();
        assert!(
            SqlExecutor::new(
                DataSource::new(pool),
                ExecutorConfig::new().with_batch_size(0)
            )
            .is_err()
        );
    }

    #[tokio::test]
    async fn pool_bounds() {
        let pool = Pool::<SqliteConnection>::new(
            PoolConfig::new("sqlite://:memory:")
                .with_max_size(1)
                .with_acquire_timeout(Duration::from_millis(50)),
        )
        .unwrap();
        let connection = pool.borrow().await.unwrap();
        assert!(pool.borrow().await.is_err());
        pool.release(connection);
        let connection = pool.borrow().await.unwrap();
        pool.discard(connection);
        let connection = pool.borrow().await.unwrap();
        pool.release(connection);
        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.borrowed, 3);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use(), 0);

        let sources = [
            DataSource::new(Pool::<SqliteConnection>::new(PoolConfig::new("sqlite://:memory:")).unwrap()),
            DataSource::new(Pool::<SqliteConnection>::new(PoolConfig::new("sqlite://:memory:")).unwrap()),
        ];
        assert_ne!(sources[0].id(), sources[1].id());
        assert_eq!(sources[0].clone().id(), sources[0].id());
    }
}
