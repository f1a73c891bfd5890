use crate::{Executor, IsolationLevel, Query, Result, Value};
use std::{borrow::Cow, future::Future, time::Duration};

/// Outcome of [`Connection::execute_batch`], aligned with the submitted parameter sets.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Rows affected by each parameter set, in submission order.
    pub affected: Vec<u64>,
    /// Generated keys read back, in submission order. Can be shorter than `affected`.
    pub keys: Vec<i64>,
}

/// A physical connection to the database.
///
/// Besides running queries (see [`Executor`]) a connection exposes the session state the core
/// manipulates: the autocommit flag, the isolation level and explicit commit/rollback. In manual
/// commit mode (`auto_commit() == false`) a transaction is always open: `commit` and `rollback`
/// end the current one and start the next.
pub trait Connection: Executor + 'static {
    /// Open a new connection to the given URL.
    fn connect(url: Cow<'static, str>) -> impl Future<Output = Result<Self>> + Send;

    fn auto_commit(&self) -> bool;

    /// Switching from manual to automatic commit commits the pending work.
    fn set_auto_commit(&mut self, enabled: bool) -> impl Future<Output = Result<()>> + Send;

    fn isolation(&self) -> IsolationLevel;

    /// `IsolationLevel::Default` leaves the connection untouched.
    fn set_isolation(&mut self, level: IsolationLevel) -> impl Future<Output = Result<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Applied to every following statement, enforced by the driver. `None` restores the default.
    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Submit the prepared `query` once per parameter set as one low-level batch.
    ///
    /// The default implementation rebinds and executes the statement for every set, reading back
    /// one generated key for each set that affected rows. Drivers with a native batch protocol
    /// should override it.
    fn execute_batch<'s>(
        &'s mut self,
        query: &'s mut Query<Self::Driver>,
        rows: &'s [Vec<Value>],
        return_keys: bool,
    ) -> impl Future<Output = Result<BatchResult>> + Send + 's {
        async move {
            let mut result = BatchResult {
                affected: Vec::with_capacity(rows.len()),
                keys: Vec::with_capacity(if return_keys { rows.len() } else { 0 }),
            };
            for row in rows {
                query.bind_all(row)?;
                let affected = self.execute(query).await?;
                result.affected.push(affected.rows_affected);
                if return_keys && affected.rows_affected > 0 {
                    if let Some(id) = affected.inserted_id {
                        result.keys.push(id);
                    }
                }
            }
            Ok(result)
        }
    }
}

/// Autocommit flag and isolation level of a connection, captured to be put back later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub auto_commit: bool,
    pub isolation: IsolationLevel,
}

impl ConnectionState {
    pub fn capture<C: Connection>(connection: &C) -> Self {
        Self {
            auto_commit: connection.auto_commit(),
            isolation: connection.isolation(),
        }
    }

    /// Isolation first: some backends refuse to change it while a transaction is pending, and
    /// switching autocommit back on ends the pending one.
    pub async fn restore<C: Connection>(&self, connection: &mut C) -> Result<()> {
        if !self.isolation.is_default() && connection.isolation() != self.isolation {
            connection.set_isolation(self.isolation).await?;
        }
        if connection.auto_commit() != self.auto_commit {
            connection.set_auto_commit(self.auto_commit).await?;
        }
        Ok(())
    }
}
