use crate::{
    All, BatchExecutor, BatchOutcome, Connection, ConnectionBroker, ConnectionLease,
    ConnectionPool, DataSource, DataTable, Driver, Error, ErrorKind, Executor, ExecutorConfig,
    FromRow, IsolationLevel, One, OperationKind, Paging, Params, ParsedSql, Result,
    ResultExtractor, RowLock, SequenceAllocator, Session, SqlCache, StreamOptions,
    StreamingCursor, Table, TransactionContext, TransactionHandle, Value, sql_context,
    stream::StreamExt, truncate_long,
};
use anyhow::Context;
use std::sync::Arc;

/// Driver of the connections handed out by the pool `P`.
pub type DriverOf<P> = <<P as ConnectionPool>::Connection as Executor>::Driver;

/// Entry point: runs SQL against a data source, honoring the transactions of the sessions.
pub struct SqlExecutor<P: ConnectionPool> {
    broker: ConnectionBroker<P>,
    config: Arc<ExecutorConfig>,
    driver: DriverOf<P>,
    cache: Arc<SqlCache>,
}

impl<P: ConnectionPool> SqlExecutor<P> {
    pub fn new(source: DataSource<P>, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            broker: ConnectionBroker::new(source),
            cache: Arc::new(SqlCache::new(config.sql_cache_capacity)),
            config: Arc::new(config),
            driver: Default::default(),
        })
    }

    pub fn source(&self) -> &DataSource<P> {
        self.broker.source()
    }

    pub fn broker(&self) -> &ConnectionBroker<P> {
        &self.broker
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn driver(&self) -> &DriverOf<P> {
        &self.driver
    }

    pub fn sql_cache(&self) -> &SqlCache {
        &self.cache
    }

    /// Operations outside of any transaction, each on its own pool connection.
    pub fn detached(&self) -> Scope<'_, 'static, P> {
        Scope {
            executor: self,
            caller: None,
            session: None,
        }
    }

    /// Operations joining the transaction of `session` on this data source, if any.
    pub fn session(&self, session: &Session) -> Scope<'_, 'static, P> {
        Scope {
            executor: self,
            caller: None,
            session: Some(session.clone()),
        }
    }

    /// Operations on a connection owned by the caller. The connection is never closed and its
    /// autocommit and isolation are never changed.
    pub fn connection<'c>(&self, connection: &'c mut P::Connection) -> Scope<'_, 'c, P> {
        Scope {
            executor: self,
            caller: Some(connection),
            session: None,
        }
    }

    /// Begin a transaction on `session`, or join the one already active. `Default` isolation
    /// resolves to the configured default.
    pub async fn begin(
        &self,
        session: &Session,
        isolation: IsolationLevel,
        for_update_only: bool,
    ) -> Result<TransactionHandle<P>> {
        TransactionContext::begin(
            self.source(),
            session,
            isolation.or(self.config.default_isolation),
            for_update_only,
            format!("session#{}", session.id()),
        )
        .await
    }

    /// Sequence `name` stored in `table`, created if missing.
    pub async fn sequence(
        &self,
        table: &str,
        name: &str,
        start: i64,
        buffer: u64,
    ) -> Result<SequenceAllocator<P>> {
        self.check_write(&format!("sequence {}.{}", table, name))?;
        SequenceAllocator::new(
            self.broker.clone(),
            &self.driver.sql_writer(),
            table,
            name,
            start,
            buffer,
        )
        .await
    }

    /// Row locks stored in `table`, created if missing.
    pub async fn row_lock(&self, table: &str) -> Result<RowLock<P>> {
        self.check_write(&format!("row lock {}", table))?;
        RowLock::new(self.broker.clone(), &self.driver.sql_writer(), table).await
    }

    fn parse(&self, sql: &str) -> Result<Arc<ParsedSql>> {
        self.cache.get_or_parse(sql, &self.driver.sql_writer())
    }

    fn check_write(&self, what: &str) -> Result<()> {
        if self.config.read_only {
            let error = Error::new(ErrorKind::ReadOnly(truncate_long!(what).to_string()));
            log::error!("{:#}", error);
            return Err(error);
        }
        Ok(())
    }
}

/// Operations bound to one way of resolving connections, see [`SqlExecutor::detached`],
/// [`SqlExecutor::session`] and [`SqlExecutor::connection`].
pub struct Scope<'e, 'c, P: ConnectionPool> {
    executor: &'e SqlExecutor<P>,
    caller: Option<&'c mut P::Connection>,
    session: Option<Session>,
}

impl<'e, 'c, P: ConnectionPool> Scope<'e, 'c, P> {
    async fn lease(&mut self, kind: OperationKind) -> Result<ConnectionLease<'_, P>> {
        let mut lease = self
            .executor
            .broker
            .resolve(self.caller.as_deref_mut(), self.session.as_ref(), kind)
            .await?;
        if let Some(timeout) = self.executor.config.query_timeout {
            lease.set_query_timeout(Some(timeout))?;
        }
        Ok(lease)
    }

    /// Run a query and turn its rows into a value with `extractor`.
    pub async fn query<X: ResultExtractor>(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        extractor: X,
    ) -> Result<X::Output> {
        self.query_paged(sql, params, Paging::default(), extractor)
            .await
    }

    /// [`Scope::query`] reading only the rows inside `paging`.
    pub async fn query_paged<X: ResultExtractor>(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
        paging: Paging,
        extractor: X,
    ) -> Result<X::Output> {
        if extractor.streams() {
            return Err(Error::new(ErrorKind::Unsupported(format!(
                "a cursor cannot be extracted, use stream to read:\n{}",
                truncate_long!(sql)
            ))));
        }
        let parsed = self.executor.parse(sql)?;
        let values = parsed.resolve(&params.into())?;
        let mut lease = self.lease(OperationKind::Read).await?;
        let mut query = lease
            .prepare(parsed.sql().to_string())
            .await
            .with_context(|| sql_context!("preparing", sql))?;
        query.bind_all(&values)?;
        let rows = lease.fetch(&mut query).boxed();
        extractor
            .extract(rows, paging)
            .await
            .with_context(|| sql_context!("fetching", sql))
    }

    pub async fn fetch_one<T: FromRow + Send>(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<T>> {
        self.query(sql, params, One::<T>::new()).await
    }

    pub async fn fetch_all<T: FromRow + Send>(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Vec<T>> {
        self.query(sql, params, All::<T>::new()).await
    }

    pub async fn fetch_table(&mut self, sql: &str, params: impl Into<Params>) -> Result<DataTable> {
        self.query(sql, params, Table).await
    }

    /// Run a statement, returns the number of affected rows.
    pub async fn update(&mut self, sql: &str, params: impl Into<Params>) -> Result<u64> {
        Ok(self.write(sql, params.into()).await?.0)
    }

    /// Run an insert, returns the generated key if a row was inserted.
    pub async fn insert(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<i64>> {
        let (affected, key) = self.write(sql, params.into()).await?;
        Ok(if affected > 0 { key } else { None })
    }

    async fn write(&mut self, sql: &str, params: Params) -> Result<(u64, Option<i64>)> {
        self.executor.check_write(sql)?;
        let parsed = self.executor.parse(sql)?;
        let values = parsed.resolve(&params)?;
        let mut lease = self.lease(OperationKind::Write).await?;
        let mut query = lease
            .prepare(parsed.sql().to_string())
            .await
            .with_context(|| sql_context!("preparing", sql))?;
        query.bind_all(&values)?;
        let affected = lease
            .execute(&mut query)
            .await
            .with_context(|| sql_context!("executing", sql))?;
        Ok((affected.rows_affected, affected.inserted_id))
    }

    /// Run a statement once per parameter set, in chunks of the configured batch size.
    pub async fn batch_update<I>(&mut self, sql: &str, param_sets: I) -> Result<BatchOutcome>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        let chunk_size = self.executor.config.batch_size;
        self.batch(sql, param_sets, chunk_size, false).await
    }

    /// [`Scope::batch_update`] reading back the generated keys, in submission order.
    pub async fn batch_insert<I>(&mut self, sql: &str, param_sets: I) -> Result<BatchOutcome>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        let chunk_size = self.executor.config.batch_size;
        self.batch(sql, param_sets, chunk_size, true).await
    }

    /// Batch with an explicit chunk size.
    pub async fn batch<I>(
        &mut self,
        sql: &str,
        param_sets: I,
        chunk_size: usize,
        return_keys: bool,
    ) -> Result<BatchOutcome>
    where
        I: IntoIterator,
        I::Item: Into<Params>,
    {
        self.executor.check_write(sql)?;
        let parsed = self.executor.parse(sql)?;
        let sets = param_sets
            .into_iter()
            .map(|params| parsed.resolve(&params.into()))
            .collect::<Result<Vec<Vec<Value>>>>()?;
        if sets.is_empty() {
            return Err(ErrorKind::invalid_argument(format!(
                "A batch needs at least one parameter set:\n{}",
                truncate_long!(sql)
            )));
        }
        if chunk_size == 0 {
            return Err(ErrorKind::invalid_argument("The chunk size must be greater than 0"));
        }
        let config = self.executor.config.clone();
        let batch = BatchExecutor::new(chunk_size)
            .with_isolation(config.default_isolation)
            .with_key_count_policy(config.key_count_policy);
        let mut lease = self.lease(OperationKind::Write).await?;
        batch
            .execute(&mut lease, parsed.sql(), &sets, return_keys)
            .await
    }

    /// A lazy cursor over the rows of `sql`. Nothing is acquired until the first row is asked.
    pub fn stream(
        self,
        sql: &str,
        params: impl Into<Params>,
        options: StreamOptions,
    ) -> Result<StreamingCursor<'c, P>> {
        let parsed = self.executor.parse(sql)?;
        let params = params.into();
        parsed.resolve(&params)?;
        Ok(StreamingCursor::new(
            self.executor.broker.clone(),
            self.caller,
            self.session,
            parsed,
            params,
            self.executor.config.query_timeout,
            options,
        ))
    }
}
