use crate::{executor, expect_error_kind};
use sluice::{Connection, ErrorKind, ExecutorConfig};
use std::{collections::HashSet, sync::Arc};

pub async fn sequence<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 4, ExecutorConfig::default());

    let orders = executor
        .sequence("seq_tbl", "order_id", 100, 10)
        .await
        .expect("Could not create the sequence");
    assert_eq!(orders.to_string(), "seq_tbl.order_id");
    let mut values = Vec::new();
    for _ in 0..11 {
        values.push(orders.next().await.expect("Could not get the next value"));
    }
    assert_eq!(values, (100..111).collect::<Vec<_>>());
    assert_eq!(orders.remaining(), 9);

    // Sequences in the same table are independent
    let invoices = executor
        .sequence("seq_tbl", "invoice_id", 1, 5)
        .await
        .expect("Could not create the sequence");
    assert_eq!(invoices.next().await.expect("Could not get the next value"), 1);
    assert_eq!(orders.next().await.expect("Could not get the next value"), 111);

    // Concurrent callers never get the same value
    let orders = Arc::new(orders);
    let tasks = (0..8)
        .map(|_| {
            let orders = orders.clone();
            tokio::spawn(async move {
                let mut values = Vec::new();
                for _ in 0..25 {
                    values.push(orders.next().await.expect("Could not get the next value"));
                }
                values
            })
        })
        .collect::<Vec<_>>();
    let mut issued = HashSet::new();
    for task in tasks {
        let values = task.await.expect("The task panicked");
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        for value in values {
            assert!(issued.insert(value), "Value {} was issued twice", value);
        }
    }
    assert_eq!(issued.len(), 200);
    let highest = issued.iter().copied().max().unwrap_or_default();

    // A second allocator, like the one of a restarted process, continues past every reservation
    let restarted = executor
        .sequence("seq_tbl", "order_id", 100, 10)
        .await
        .expect("Could not create the sequence");
    let next = restarted.next().await.expect("Could not get the next value");
    assert!(next > highest);
    let other = orders.next().await.expect("Could not get the next value");
    assert_ne!(next, other);

    // Resetting below the persisted value never goes back
    restarted
        .reset(0, 5)
        .await
        .expect("Could not reset the sequence");
    assert_eq!(restarted.buffer(), 5);
    assert_eq!(restarted.remaining(), 0);
    let after = restarted.next().await.expect("Could not get the next value");
    assert!(after > next && after > other);
    restarted
        .reset(10_000, 5)
        .await
        .expect("Could not reset the sequence");
    assert_eq!(
        restarted.next().await.expect("Could not get the next value"),
        10_000
    );

    assert!(matches!(
        expect_error_kind(executor.sequence("", "order_id", 1, 10).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(executor.sequence("seq_tbl", " ", 1, 10).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(executor.sequence("seq_tbl", "order_id", 1, 0).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(executor.sequence("seq_tbl", &"x".repeat(65), 1, 10).await),
        ErrorKind::InvalidArgument(..)
    ));
    assert!(matches!(
        expect_error_kind(restarted.reset(1, 0).await),
        ErrorKind::InvalidArgument(..)
    ));
}
