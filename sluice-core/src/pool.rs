use crate::{Connection, Error, ErrorKind, Result, util::lock};
use std::{
    fmt::{self, Display},
    future::Future,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{sync::Semaphore, time::timeout};
use url::form_urlencoded;

/// Source of physical connections.
///
/// The core only borrows and gives back; how connections are created, validated or recycled is
/// up to the implementation. [`Pool`] is a simple bounded implementation.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Connection;

    fn borrow(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    /// Give back a connection in a reusable state.
    fn release(&self, connection: Self::Connection);

    /// Give back a connection whose state is unknown, it must not be reused.
    fn discard(&self, connection: Self::Connection);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Passed verbatim to [`Connection::connect`].
    pub url: String,
    pub max_size: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Read the pool settings from the query part of a connection URL.
    ///
    /// `pool_max_size` and `pool_acquire_timeout_ms` are consumed, every other parameter is left
    /// for the driver:
    /// ```rust
    /// use sluice_core::PoolConfig;
    /// let config = PoolConfig::from_url("sqlite://data.db?mode=rwc&pool_max_size=4").unwrap();
    /// assert_eq!(config.url, "sqlite://data.db?mode=rwc");
    /// assert_eq!(config.max_size, 4);
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let mut result = Self::default();
        let Some((base, query)) = url.split_once('?') else {
            result.url = url.to_string();
            return Ok(result);
        };
        let mut driver_params = form_urlencoded::Serializer::new(String::new());
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "pool_max_size" => {
                    result.max_size = value.parse().map_err(|e| {
                        Error::new(e).context(format!("Invalid pool_max_size `{}`", value))
                    })?;
                }
                "pool_acquire_timeout_ms" => {
                    let millis: u64 = value.parse().map_err(|e| {
                        Error::new(e).context(format!("Invalid pool_acquire_timeout_ms `{}`", value))
                    })?;
                    result.acquire_timeout = Duration::from_millis(millis);
                }
                _ => {
                    driver_params.append_pair(&key, &value);
                }
            }
        }
        let driver_params = driver_params.finish();
        result.url = if driver_params.is_empty() {
            base.to_string()
        } else {
            format!("{}?{}", base, driver_params)
        };
        result.validate()?;
        Ok(result)
    }

    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(ErrorKind::invalid_argument("pool max_size must be greater than 0"));
        }
        Ok(())
    }
}

/// Counters of a [`Pool`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub borrowed: u64,
    pub released: u64,
    pub discarded: u64,
    pub idle: usize,
}

impl PoolStats {
    /// Connections currently lent out.
    pub fn in_use(&self) -> u64 {
        self.borrowed - self.released - self.discarded
    }
}

/// Bounded pool handing out at most `max_size` connections, reusing idle ones first.
pub struct Pool<C: Connection> {
    config: PoolConfig,
    idle: Mutex<Vec<C>>,
    permits: Semaphore,
    created: AtomicU64,
    borrowed: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl<C: Connection> Pool<C> {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            permits: Semaphore::new(config.max_size),
            config,
            idle: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            borrowed: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: lock(&self.idle).len(),
        }
    }
}

impl<C: Connection> ConnectionPool for Pool<C> {
    type Connection = C;

    async fn borrow(&self) -> Result<C> {
        let permit = timeout(self.config.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                let error = Error::msg(format!(
                    "Timed out after {:?} waiting for a connection (max_size = {})",
                    self.config.acquire_timeout, self.config.max_size
                ));
                log::error!("{:#}", error);
                error
            })?
            .map_err(|e| Error::new(e).context("The connection pool is closed"))?;
        permit.forget();
        let idle = lock(&self.idle).pop();
        let connection = match idle {
            Some(connection) => connection,
            None => match C::connect(self.config.url.clone().into()).await {
                Ok(connection) => {
                    self.created.fetch_add(1, Ordering::Relaxed);
                    connection
                }
                Err(e) => {
                    self.permits.add_permits(1);
                    return Err(e.context("Could not open a new pooled connection"));
                }
            },
        };
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    fn release(&self, connection: C) {
        lock(&self.idle).push(connection);
        self.released.fetch_add(1, Ordering::Relaxed);
        self.permits.add_permits(1);
    }

    fn discard(&self, connection: C) {
        drop(connection);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.permits.add_permits(1);
    }
}

/// Process unique identity of a [`DataSource`], the key of ambient transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSourceId(u64);

impl Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ds#{}", self.0)
    }
}

/// A logical data source: a pool with an identity.
pub struct DataSource<P: ConnectionPool> {
    id: DataSourceId,
    pool: Arc<P>,
}

impl<P: ConnectionPool> DataSource<P> {
    pub fn new(pool: P) -> Self {
        Self::from_arc(Arc::new(pool))
    }

    pub fn from_arc(pool: Arc<P>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: DataSourceId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            pool,
        }
    }

    pub fn id(&self) -> DataSourceId {
        self.id
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }
}

impl<P: ConnectionPool> Clone for DataSource<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            pool: self.pool.clone(),
        }
    }
}

/// A connection borrowed from a pool, given back exactly once when dropped.
pub struct PooledConnection<P: ConnectionPool> {
    connection: ManuallyDrop<P::Connection>,
    pool: Arc<P>,
    discard: bool,
}

impl<P: ConnectionPool> PooledConnection<P> {
    pub fn new(connection: P::Connection, pool: Arc<P>) -> Self {
        Self {
            connection: ManuallyDrop::new(connection),
            pool,
            discard: false,
        }
    }

    /// Do not reuse the connection once dropped.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<P: ConnectionPool> Deref for PooledConnection<P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<P: ConnectionPool> DerefMut for PooledConnection<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<P: ConnectionPool> Drop for PooledConnection<P> {
    fn drop(&mut self) {
        // SAFETY: the field is never used again after this point.
        let connection = unsafe { ManuallyDrop::take(&mut self.connection) };
        if self.discard {
            self.pool.discard(connection);
        } else {
            self.pool.release(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PoolConfig;
    use std::time::Duration;

    #[test]
    fn config_from_url() {
        let config =
            PoolConfig::from_url("sqlite:///tmp/a.db?pool_acquire_timeout_ms=250&mode=rwc&pool_max_size=3")
                .unwrap();
        assert_eq!(config.url, "sqlite:///tmp/a.db?mode=rwc");
        assert_eq!(config.max_size, 3);
        assert_eq!(config.acquire_timeout, Duration::from_millis(250));

        let config = PoolConfig::from_url("sqlite://plain.db").unwrap();
        assert_eq!(config.url, "sqlite://plain.db");
        assert_eq!(config.max_size, 10);

        assert!(PoolConfig::from_url("sqlite://a.db?pool_max_size=0").is_err());
        assert!(PoolConfig::from_url("sqlite://a.db?pool_max_size=many").is_err());
    }
}
