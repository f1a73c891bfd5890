use crate::{
    Connection, ConnectionBroker, ConnectionPool, Executor, FromRow, OperationKind, Params,
    ParsedSql, Result, RowLabeled, Session, sql_context, transaction::StreamClaim,
    stream::{self, BoxStream, Stream, StreamExt, TryStreamExt},
};
use anyhow::Context;
use async_stream::try_stream;
use std::{mem, sync::Arc, time::Duration};

/// Options of a streaming query.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Rows skipped once, before the first row is yielded.
    pub offset: u64,
    /// Stop after this many rows.
    pub max_rows: Option<u64>,
    /// Borrow a fresh connection even when the session has a transaction on this data source.
    ///
    /// A cursor joining the transaction holds its connection until closed. Meanwhile every other
    /// operation on the transaction, including its commit and rollback, fails with
    /// [`ErrorKind::Busy`](crate::ErrorKind::Busy). Rows read outside do not see the uncommitted
    /// changes of the transaction.
    pub outside_transaction: bool,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn outside_transaction(mut self) -> Self {
        self.outside_transaction = true;
        self
    }
}

struct Deferred<'a, P: ConnectionPool> {
    broker: ConnectionBroker<P>,
    caller: Option<&'a mut P::Connection>,
    session: Option<Session>,
    sql: Arc<ParsedSql>,
    params: Params,
    timeout: Option<Duration>,
}

enum CursorState<'a, P: ConnectionPool> {
    Unstarted(Box<Deferred<'a, P>>),
    Active {
        rows: BoxStream<'a, Result<RowLabeled>>,
        peeked: Option<RowLabeled>,
    },
    Closed,
}

/// Lazy, forward only, single pass sequence of rows.
///
/// Nothing is acquired until the first call to [`has_next`](Self::has_next),
/// [`next`](Self::next), [`skip`](Self::skip) or [`count`](Self::count). From then on the cursor
/// owns the connection lease and the prepared statement, released together (statement first) on
/// [`close`](Self::close), on exhaustion and on the first error. Dropping the cursor closes it.
pub struct StreamingCursor<'a, P: ConnectionPool> {
    state: CursorState<'a, P>,
    options: StreamOptions,
}

impl<'a, P: ConnectionPool> StreamingCursor<'a, P> {
    pub(crate) fn new(
        broker: ConnectionBroker<P>,
        caller: Option<&'a mut P::Connection>,
        session: Option<Session>,
        sql: Arc<ParsedSql>,
        params: Params,
        timeout: Option<Duration>,
        options: StreamOptions,
    ) -> Self {
        Self {
            state: CursorState::Unstarted(Box::new(Deferred {
                broker,
                caller,
                session,
                sql,
                params,
                timeout,
            })),
            options,
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.state, CursorState::Unstarted(..))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, CursorState::Closed)
    }

    async fn materialize(&mut self) -> Result<()> {
        let deferred = match mem::replace(&mut self.state, CursorState::Closed) {
            CursorState::Unstarted(deferred) => *deferred,
            state => {
                self.state = state;
                return Ok(());
            }
        };
        let Deferred {
            broker,
            caller,
            session,
            sql,
            params,
            timeout,
        } = deferred;
        let session = if self.options.outside_transaction {
            None
        } else {
            session.as_ref()
        };
        let mut lease = broker.resolve(caller, session, OperationKind::Read).await?;
        log::debug!("Cursor materialized on a {:?}", lease);
        let claim = lease.context().cloned().map(StreamClaim::new);
        if timeout.is_some() {
            lease.set_query_timeout(timeout)?;
        }
        let mut query = lease
            .prepare(sql.sql().to_string())
            .await
            .with_context(|| sql_context!("preparing", sql.original()))?;
        sql.bind(&mut query, &params)?;
        let offset = self.options.offset;
        let max_rows = self.options.max_rows;
        let rows = try_stream! {
            let _claim = claim;
            let mut lease = lease;
            let mut query = query;
            {
                let mut rows = lease.fetch(&mut query).boxed();
                let mut skipped = 0;
                let mut produced = 0;
                while max_rows.is_none_or(|max| produced < max) {
                    let Some(row) = rows
                        .try_next()
                        .await
                        .with_context(|| sql_context!("streaming", sql.original()))?
                    else {
                        break;
                    };
                    if skipped < offset {
                        skipped += 1;
                        continue;
                    }
                    produced += 1;
                    yield row;
                }
            }
        };
        self.state = CursorState::Active {
            rows: rows.boxed(),
            peeked: None,
        };
        Ok(())
    }

    async fn pull(&mut self) -> Result<Option<RowLabeled>> {
        self.materialize().await?;
        let CursorState::Active { rows, peeked } = &mut self.state else {
            return Ok(None);
        };
        if let Some(row) = peeked.take() {
            return Ok(Some(row));
        }
        match rows.try_next().await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(error) => {
                self.close();
                Err(error)
            }
        }
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        let Some(row) = self.pull().await? else {
            return Ok(false);
        };
        if let CursorState::Active { peeked, .. } = &mut self.state {
            *peeked = Some(row);
        }
        Ok(true)
    }

    pub async fn next(&mut self) -> Result<Option<RowLabeled>> {
        self.pull().await
    }

    pub async fn next_as<T: FromRow>(&mut self) -> Result<Option<T>> {
        self.pull().await?.map(T::from_row).transpose()
    }

    /// Discard up to `n` rows, returns how many were discarded.
    pub async fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n && self.pull().await?.is_some() {
            skipped += 1;
        }
        Ok(skipped)
    }

    /// Consume the remaining rows and count them.
    pub async fn count(&mut self) -> Result<u64> {
        let mut count = 0;
        while self.pull().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Release everything the cursor holds. Closing again does nothing.
    pub fn close(&mut self) {
        if !self.is_closed() {
            if self.is_started() {
                log::debug!("Cursor closed");
            }
            self.state = CursorState::Closed;
        }
    }

    /// The remaining rows as a stream, closed when it ends or fails.
    pub fn into_stream(self) -> impl Stream<Item = Result<RowLabeled>> + Send + 'a {
        stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(row)) => Some((Ok(row), cursor)),
                Ok(None) => None,
                Err(error) => Some((Err(error), cursor)),
            }
        })
    }
}
