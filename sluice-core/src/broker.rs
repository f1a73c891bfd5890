use crate::{
    ConnectionPool, DataSource, Error, ErrorKind, PooledConnection, Result, Session,
    TransactionContext,
};
use anyhow::Context;
use std::{
    fmt::{self, Debug},
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tokio::sync::{OwnedMappedMutexGuard, OwnedMutexGuard};

/// Whether an operation only reads or may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Write,
}

/// Who gives the connection of a lease back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOwnership {
    /// Supplied by the caller, never closed nor reconfigured implicitly.
    Caller,
    /// Borrowed for this operation, given back to the pool when the lease drops.
    Broker,
    /// Bound to a transaction context, given back by the context on completion.
    Context,
}

/// A connection acquired for the duration of one operation.
pub enum ConnectionLease<'a, P: ConnectionPool> {
    Caller(&'a mut P::Connection),
    Pooled(PooledConnection<P>),
    Joined {
        guard: OwnedMappedMutexGuard<Option<P::Connection>, P::Connection>,
        context: Arc<TransactionContext<P>>,
    },
}

impl<'a, P: ConnectionPool> ConnectionLease<'a, P> {
    pub fn ownership(&self) -> LeaseOwnership {
        match self {
            ConnectionLease::Caller(..) => LeaseOwnership::Caller,
            ConnectionLease::Pooled(..) => LeaseOwnership::Broker,
            ConnectionLease::Joined { .. } => LeaseOwnership::Context,
        }
    }

    /// Transaction the lease runs in, if joined.
    pub fn context(&self) -> Option<&Arc<TransactionContext<P>>> {
        match self {
            ConnectionLease::Joined { context, .. } => Some(context),
            _ => None,
        }
    }

    /// A broker owned connection will not be reused, no effect on the other kinds.
    pub fn discard(&mut self) {
        if let ConnectionLease::Pooled(connection) = self {
            connection.discard();
        }
    }
}

impl<'a, P: ConnectionPool> Deref for ConnectionLease<'a, P> {
    type Target = P::Connection;

    fn deref(&self) -> &Self::Target {
        match self {
            ConnectionLease::Caller(connection) => connection,
            ConnectionLease::Pooled(connection) => connection,
            ConnectionLease::Joined { guard, .. } => guard,
        }
    }
}

impl<'a, P: ConnectionPool> DerefMut for ConnectionLease<'a, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            ConnectionLease::Caller(connection) => connection,
            ConnectionLease::Pooled(connection) => connection,
            ConnectionLease::Joined { guard, .. } => guard,
        }
    }
}

impl<'a, P: ConnectionPool> Debug for ConnectionLease<'a, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ConnectionLease");
        debug.field("ownership", &self.ownership());
        if let Some(context) = self.context() {
            debug.field("transaction", &context.id());
        }
        debug.finish()
    }
}

/// Decides, for every operation, which physical connection to use.
pub struct ConnectionBroker<P: ConnectionPool> {
    source: DataSource<P>,
}

impl<P: ConnectionPool> ConnectionBroker<P> {
    pub fn new(source: DataSource<P>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &DataSource<P> {
        &self.source
    }

    /// Resolve the connection of one operation:
    /// - the caller connection, when given;
    /// - the connection of the session's transaction on this data source, unless the transaction
    ///   is for update only and the operation is a read;
    /// - a fresh pool connection.
    pub async fn resolve<'a>(
        &self,
        caller: Option<&'a mut P::Connection>,
        session: Option<&Session>,
        kind: OperationKind,
    ) -> Result<ConnectionLease<'a, P>> {
        if let Some(connection) = caller {
            return Ok(ConnectionLease::Caller(connection));
        }
        if let Some(context) = session.and_then(|s| s.context::<P>(self.source.id())) {
            if context.for_update_only() && kind == OperationKind::Read {
                log::debug!(
                    "Read bypasses the for update only transaction {}",
                    context.id()
                );
            } else {
                return Self::join(context).await;
            }
        }
        self.borrow().await
    }

    /// A fresh broker owned connection, ignoring any transaction.
    pub async fn borrow<'a>(&self) -> Result<ConnectionLease<'a, P>> {
        let connection = self
            .source
            .pool()
            .borrow()
            .await
            .with_context(|| format!("While borrowing a connection from {}", self.source.id()))?;
        Ok(ConnectionLease::Pooled(PooledConnection::new(
            connection,
            self.source.pool().clone(),
        )))
    }

    async fn join<'a>(context: Arc<TransactionContext<P>>) -> Result<ConnectionLease<'a, P>> {
        if !context.is_usable() {
            return Err(Error::new(ErrorKind::Inactive(context.id())));
        }
        context.check_not_streaming()?;
        let guard = context.connection().lock_owned().await;
        let guard = OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| Error::new(ErrorKind::Inactive(context.id())))?;
        Ok(ConnectionLease::Joined { guard, context })
    }
}

impl<P: ConnectionPool> Clone for ConnectionBroker<P> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}
