use crate::{
    Connection, ConnectionPool, ConnectionState, DataSource, DataSourceId, Error, ErrorKind,
    IsolationLevel, Result, util::lock,
};
use anyhow::Context;
use std::{
    any::Any,
    collections::HashMap,
    fmt::{self, Debug},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

type Registered = (u64, Arc<dyn Any + Send + Sync>);

/// One logical line of execution.
///
/// Holds at most one active transaction context per data source. Operations issued through the
/// same session join the transaction begun on it, operations without a session never do. Cloning
/// the session clones the handle, not the registry.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    contexts: Mutex<HashMap<DataSourceId, Registered>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                contexts: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The active context of this session on `source`, if any.
    pub fn context<P: ConnectionPool>(
        &self,
        source: DataSourceId,
    ) -> Option<Arc<TransactionContext<P>>> {
        let contexts = lock(&self.inner.contexts);
        let (_, context) = contexts.get(&source)?;
        context.clone().downcast::<TransactionContext<P>>().ok()
    }

    pub fn has_transaction(&self, source: DataSourceId) -> bool {
        lock(&self.inner.contexts).contains_key(&source)
    }

    /// Register `context` unless another one got there first, which is returned instead.
    fn register<P: ConnectionPool>(
        &self,
        context: Arc<TransactionContext<P>>,
    ) -> Option<Arc<TransactionContext<P>>> {
        let mut contexts = lock(&self.inner.contexts);
        if let Some((_, existing)) = contexts.get(&context.source) {
            return existing.clone().downcast::<TransactionContext<P>>().ok();
        }
        let id = context.id;
        let source = context.source;
        contexts.insert(source, (id, context as Arc<dyn Any + Send + Sync>));
        None
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("transactions", &lock(&self.inner.contexts).len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    /// A nested participant rolled back, the final completion rolls back too.
    MarkedRollback,
    /// The commit was attempted and failed, a rollback is pending.
    FailedCommit,
    Committed,
    RolledBack,
}

struct ContextState {
    ref_count: usize,
    status: TransactionStatus,
    original: ConnectionState,
}

enum Completion {
    Pending,
    Commit,
    Rollback,
}

/// Shared, reference counted transaction over one physical connection.
///
/// Every [`TransactionHandle`] returned by a `begin` holds one reference. The connection is
/// committed or rolled back, restored and given back to the pool when the last one completes.
pub struct TransactionContext<P: ConnectionPool> {
    id: u64,
    source: DataSourceId,
    creator: String,
    isolation: IsolationLevel,
    for_update_only: bool,
    pool: Arc<P>,
    connection: Arc<tokio::sync::Mutex<Option<P::Connection>>>,
    session: Weak<SessionInner>,
    state: Mutex<ContextState>,
    streaming: AtomicBool,
}

impl<P: ConnectionPool> TransactionContext<P> {
    /// Begin a transaction on `source` for `session`, or join the one already active.
    ///
    /// `isolation` is applied only when the context is created, a joining call cannot change the
    /// isolation of the live connection.
    pub async fn begin(
        source: &DataSource<P>,
        session: &Session,
        isolation: IsolationLevel,
        for_update_only: bool,
        creator: impl Into<String>,
    ) -> Result<TransactionHandle<P>> {
        let creator = creator.into();
        if let Some(context) = session.context::<P>(source.id()) {
            context.join(isolation, &creator)?;
            return Ok(TransactionHandle::new(context, isolation, for_update_only));
        }
        let mut connection = source
            .pool()
            .borrow()
            .await
            .with_context(|| format!("While beginning a transaction on {}", source.id()))?;
        let original = ConnectionState::capture(&connection);
        if let Err(error) = Self::setup(&mut connection, isolation).await {
            source.pool().discard(connection);
            return Err(error.context(format!(
                "While beginning a transaction on {}",
                source.id()
            )));
        }
        let context = Arc::new(Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            source: source.id(),
            creator,
            isolation: if isolation.is_default() {
                original.isolation
            } else {
                isolation
            },
            for_update_only,
            pool: source.pool().clone(),
            connection: Arc::new(tokio::sync::Mutex::new(Some(connection))),
            session: Arc::downgrade(&session.inner),
            state: Mutex::new(ContextState {
                ref_count: 1,
                status: TransactionStatus::Active,
                original,
            }),
            streaming: AtomicBool::new(false),
        });
        if let Some(existing) = session.register(context.clone()) {
            // Lost the registration race against a concurrent begin on the same session
            log::debug!(
                "Transaction {} already active on {}, giving back the connection of {}",
                existing.id,
                source.id(),
                context.id
            );
            context.abort().await;
            existing.join(isolation, &context.creator)?;
            return Ok(TransactionHandle::new(existing, isolation, for_update_only));
        }
        log::debug!(
            "Transaction {} begun on {} by `{}` ({})",
            context.id,
            context.source,
            context.creator,
            context.isolation
        );
        Ok(TransactionHandle::new(context, isolation, for_update_only))
    }

    async fn setup(connection: &mut P::Connection, isolation: IsolationLevel) -> Result<()> {
        if !isolation.is_default() && connection.isolation() != isolation {
            connection.set_isolation(isolation).await?;
        }
        connection.set_auto_commit(false).await
    }

    fn join(&self, isolation: IsolationLevel, creator: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.status != TransactionStatus::Active {
            return Err(Error::new(ErrorKind::Inactive(self.id)));
        }
        state.ref_count += 1;
        if !isolation.is_default() && isolation != self.isolation {
            log::debug!(
                "`{}` requested {} but joined transaction {} running with {}",
                creator,
                isolation,
                self.id,
                self.isolation
            );
        }
        Ok(())
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> DataSourceId {
        self.source
    }

    /// Tag of the operation that created the context.
    pub fn creator(&self) -> &str {
        &self.creator
    }

    /// Isolation of the live connection.
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn for_update_only(&self) -> bool {
        self.for_update_only
    }

    pub fn status(&self) -> TransactionStatus {
        lock(&self.state).status
    }

    pub fn ref_count(&self) -> usize {
        lock(&self.state).ref_count
    }

    /// Operations can still run on the connection.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status(),
            TransactionStatus::Active | TransactionStatus::MarkedRollback
        )
    }

    /// An open cursor holds the connection.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Fail with [`ErrorKind::Busy`] instead of waiting on a connection held by an open cursor,
    /// which would never be given back while the waiter blocks the cursor owner.
    pub(crate) fn check_not_streaming(&self) -> Result<()> {
        if self.is_streaming() {
            let error = Error::new(ErrorKind::Busy(self.id));
            log::error!("{:#}", error);
            return Err(error);
        }
        Ok(())
    }

    pub(crate) fn connection(&self) -> Arc<tokio::sync::Mutex<Option<P::Connection>>> {
        self.connection.clone()
    }

    fn set_status(&self, status: TransactionStatus) {
        lock(&self.state).status = status;
    }

    fn leave(&self, commit: bool) -> Completion {
        let mut state = lock(&self.state);
        state.ref_count = state.ref_count.saturating_sub(1);
        if state.ref_count > 0 {
            if !commit && state.status == TransactionStatus::Active {
                log::debug!(
                    "Transaction {} marked rollback-only by a nested participant",
                    self.id
                );
                state.status = TransactionStatus::MarkedRollback;
            }
            return Completion::Pending;
        }
        if commit && state.status == TransactionStatus::Active {
            Completion::Commit
        } else {
            Completion::Rollback
        }
    }

    async fn commit(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            return Ok(());
        };
        match connection.commit().await {
            Ok(()) => {
                self.set_status(TransactionStatus::Committed);
                log::debug!("Transaction {} committed", self.id);
                self.release(guard.take(), false).await;
                Ok(())
            }
            Err(error) => {
                self.set_status(TransactionStatus::FailedCommit);
                let error = error.context(format!("While committing transaction {}", self.id));
                log::error!("{:#}", error);
                Err(error)
            }
        }
    }

    async fn rollback(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            return Ok(());
        };
        let result = connection.rollback().await;
        self.set_status(TransactionStatus::RolledBack);
        let failed = result.is_err();
        self.release(guard.take(), failed).await;
        match result {
            Ok(()) => {
                log::debug!("Transaction {} rolled back", self.id);
                Ok(())
            }
            Err(error) => {
                let error = error.context(format!("While rolling back transaction {}", self.id));
                log::error!("{:#}", error);
                Err(error)
            }
        }
    }

    /// Give back the connection of a context that never became visible.
    async fn abort(&self) {
        let connection = self.connection.lock().await.take();
        self.set_status(TransactionStatus::RolledBack);
        self.release(connection, false).await;
    }

    /// Restore the connection state and give it back, exactly once since the connection is
    /// taken out of the context.
    async fn release(&self, connection: Option<P::Connection>, mut discard: bool) {
        self.deregister();
        let Some(mut connection) = connection else {
            return;
        };
        let original = lock(&self.state).original;
        if !discard {
            if let Err(error) = original.restore(&mut connection).await {
                log::error!(
                    "{:#}",
                    error.context(format!(
                        "While restoring the connection of transaction {}, discarding it",
                        self.id
                    ))
                );
                discard = true;
            }
        }
        if discard {
            self.pool.discard(connection);
        } else {
            self.pool.release(connection);
        }
    }

    /// No runtime is available to roll back: drop the connection, the backend rolls back.
    fn abandon(&self) {
        self.set_status(TransactionStatus::RolledBack);
        self.deregister();
        match self.connection.try_lock() {
            Ok(mut guard) => {
                if let Some(connection) = guard.take() {
                    self.pool.discard(connection);
                }
            }
            Err(..) => log::error!(
                "Transaction {} abandoned while its connection was in use",
                self.id
            ),
        }
    }

    fn deregister(&self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        let mut contexts = lock(&session.contexts);
        if matches!(contexts.get(&self.source), Some((id, _)) if *id == self.id) {
            contexts.remove(&self.source);
        }
    }
}

impl<P: ConnectionPool> Debug for TransactionContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("creator", &self.creator)
            .field("isolation", &self.isolation)
            .field("for_update_only", &self.for_update_only)
            .field("status", &self.status())
            .field("ref_count", &self.ref_count())
            .field("streaming", &self.is_streaming())
            .finish()
    }
}

/// Participation of one `begin` call in a transaction context.
///
/// Call [`TransactionHandle::commit`] on success and
/// [`TransactionHandle::rollback_if_not_committed`] on every exit path. A handle dropped while
/// still open rolls the whole transaction back.
pub struct TransactionHandle<P: ConnectionPool> {
    context: Arc<TransactionContext<P>>,
    isolation: IsolationLevel,
    for_update_only: bool,
    finished: bool,
}

impl<P: ConnectionPool> TransactionHandle<P> {
    fn new(
        context: Arc<TransactionContext<P>>,
        isolation: IsolationLevel,
        for_update_only: bool,
    ) -> Self {
        Self {
            context,
            isolation,
            for_update_only,
            finished: false,
        }
    }

    pub fn context(&self) -> &Arc<TransactionContext<P>> {
        &self.context
    }

    pub fn id(&self) -> u64 {
        self.context.id
    }

    /// Isolation requested by this call, can differ from the live one when joining.
    pub fn requested_isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn requested_for_update_only(&self) -> bool {
        self.for_update_only
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Complete this participation. The last one commits, or rolls back and fails with
    /// [`ErrorKind::RolledBack`] when a participant rolled back. A second call does nothing.
    pub async fn commit(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.context.check_not_streaming()?;
        self.finished = true;
        match self.context.leave(true) {
            Completion::Pending => Ok(()),
            Completion::Commit => self.context.commit().await,
            Completion::Rollback => {
                self.context.rollback().await?;
                Err(Error::new(ErrorKind::RolledBack(self.context.id)))
            }
        }
    }

    /// Roll back unless already completed. After a failed commit this performs the pending
    /// rollback, after a successful one it does nothing.
    pub async fn rollback_if_not_committed(&mut self) -> Result<()> {
        if !self.finished || self.context.status() == TransactionStatus::FailedCommit {
            self.context.check_not_streaming()?;
        }
        if !self.finished {
            self.finished = true;
            return match self.context.leave(false) {
                Completion::Pending => Ok(()),
                Completion::Commit | Completion::Rollback => self.context.rollback().await,
            };
        }
        if self.context.status() == TransactionStatus::FailedCommit {
            return self.context.rollback().await;
        }
        Ok(())
    }
}

impl<P: ConnectionPool> Drop for TransactionHandle<P> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        log::warn!(
            "Transaction {} dropped without commit or rollback (created by `{}`), rolling it back",
            self.context.id,
            self.context.creator
        );
        if let Completion::Pending = self.context.leave(false) {
            return;
        }
        let context = self.context.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = context.rollback().await;
                });
            }
            Err(..) => context.abandon(),
        }
    }
}

/// Marks the connection of a context as held by a cursor until dropped.
pub(crate) struct StreamClaim<P: ConnectionPool> {
    context: Arc<TransactionContext<P>>,
}

impl<P: ConnectionPool> StreamClaim<P> {
    pub(crate) fn new(context: Arc<TransactionContext<P>>) -> Self {
        context.streaming.store(true, Ordering::Release);
        Self { context }
    }
}

impl<P: ConnectionPool> Drop for StreamClaim<P> {
    fn drop(&mut self) {
        self.context.streaming.store(false, Ordering::Release);
    }
}

impl<P: ConnectionPool> Debug for TransactionHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("context", &self.context)
            .field("isolation", &self.isolation)
            .field("for_update_only", &self.for_update_only)
            .field("finished", &self.finished)
            .finish()
    }
}
