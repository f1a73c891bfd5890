use crate::executor;
use sluice::{
    Connection, ExecutorConfig, IsolationLevel, LeaseOwnership, OperationKind, Session,
};

pub async fn broker<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 2, ExecutorConfig::default());
    let broker = executor.broker();
    let pool = executor.source().pool().clone();

    // Caller connection, the pool is not involved
    let mut connection = C::connect(url.to_string().into())
        .await
        .expect("Could not connect");
    let before = pool.stats();
    {
        let lease = broker
            .resolve(Some(&mut connection), None, OperationKind::Write)
            .await
            .expect("Could not resolve the caller connection");
        assert_eq!(lease.ownership(), LeaseOwnership::Caller);
        assert!(lease.context().is_none());
    }
    assert_eq!(pool.stats(), before);
    for _ in 0..2 {
        let value = executor
            .connection(&mut connection)
            .fetch_one::<i64>("SELECT 1", ())
            .await
            .expect("The caller connection must stay open");
        assert_eq!(value, Some(1));
    }

    // No session: a pool connection, given back when the lease goes away
    {
        let lease = broker
            .resolve(None, None, OperationKind::Read)
            .await
            .expect("Could not borrow");
        assert_eq!(lease.ownership(), LeaseOwnership::Broker);
        assert_eq!(pool.stats().in_use(), 1);
    }
    assert_eq!(pool.stats().in_use(), 0);

    // A session without a transaction behaves the same
    let session = Session::new();
    {
        let lease = broker
            .resolve(None, Some(&session), OperationKind::Write)
            .await
            .expect("Could not borrow");
        assert_eq!(lease.ownership(), LeaseOwnership::Broker);
    }

    let mut transaction = executor
        .begin(&session, IsolationLevel::Default, false)
        .await
        .expect("Could not begin");
    {
        let lease = broker
            .resolve(None, Some(&session), OperationKind::Read)
            .await
            .expect("Could not join");
        assert_eq!(lease.ownership(), LeaseOwnership::Context);
        assert_eq!(
            lease.context().map(|context| context.id()),
            Some(transaction.id())
        );
    }
    {
        let lease = broker
            .resolve(None, None, OperationKind::Read)
            .await
            .expect("Could not borrow");
        assert_eq!(lease.ownership(), LeaseOwnership::Broker);
    }
    {
        let lease = broker
            .resolve(Some(&mut connection), Some(&session), OperationKind::Write)
            .await
            .expect("Could not resolve the caller connection");
        assert_eq!(lease.ownership(), LeaseOwnership::Caller);
    }
    transaction.commit().await.expect("Could not commit");
    assert_eq!(pool.stats().in_use(), 0);

    // Reads bypass a transaction that is for update only
    let mut transaction = executor
        .begin(&session, IsolationLevel::Default, true)
        .await
        .expect("Could not begin");
    assert!(transaction.context().for_update_only());
    {
        let lease = broker
            .resolve(None, Some(&session), OperationKind::Read)
            .await
            .expect("Could not borrow");
        assert_eq!(lease.ownership(), LeaseOwnership::Broker);
        assert_eq!(pool.stats().in_use(), 2);
    }
    {
        let lease = broker
            .resolve(None, Some(&session), OperationKind::Write)
            .await
            .expect("Could not join");
        assert_eq!(lease.ownership(), LeaseOwnership::Context);
    }
    transaction.commit().await.expect("Could not commit");
    assert!(!session.has_transaction(executor.source().id()));
    assert_eq!(pool.stats().in_use(), 0);
}
