mod batch;
mod broker;
mod cursor;
mod query;
mod row_lock;
mod sequence;
mod transaction;
mod values;

pub use batch::batch;
pub use broker::broker;
pub use cursor::cursor;
pub use query::query;
pub use row_lock::row_lock;
pub use sequence::sequence;
pub use transaction::transaction;
pub use values::values;

use log::LevelFilter;
use sluice::{
    Connection, DataSource, ErrorKind, ExecutorConfig, Pool, PoolConfig, Result, SqlExecutor,
    error_kind,
};
use std::env;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Executor over a fresh pool of at most `max_size` connections to `url`.
pub fn executor<C: Connection>(
    url: &str,
    max_size: usize,
    config: ExecutorConfig,
) -> SqlExecutor<Pool<C>> {
    let pool = Pool::<C>::new(PoolConfig::new(url).with_max_size(max_size))
        .expect("Could not create the pool");
    SqlExecutor::new(DataSource::new(pool), config).expect("Invalid executor configuration")
}

/// Kind of the error `result` must hold.
pub fn expect_error_kind<T>(result: Result<T>) -> ErrorKind {
    match result {
        Ok(..) => panic!("Expected the operation to fail"),
        Err(error) => error_kind(&error)
            .cloned()
            .unwrap_or_else(|| panic!("Expected an error raised by sluice, got: {:#}", error)),
    }
}

/// Run every suite against the database at `url`. Suites use distinct tables.
pub async fn execute_tests<C: Connection>(url: &str) {
    query::<C>(url).await;
    values::<C>(url).await;
    batch::<C>(url).await;
    broker::<C>(url).await;
    transaction::<C>(url).await;
    cursor::<C>(url).await;
    sequence::<C>(url).await;
    row_lock::<C>(url).await;
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
