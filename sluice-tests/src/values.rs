use crate::executor;
use rust_decimal::Decimal;
use sluice::{Connection, ExecutorConfig, Value, params};
use time::macros::datetime;
use uuid::Uuid;

pub async fn values<C: Connection>(url: &str) {
    let executor = executor::<C>(url, 1, ExecutorConfig::default());
    let mut scope = executor.detached();
    scope
        .update(
            "CREATE TABLE value_item (
                id INTEGER PRIMARY KEY,
                flag BOOLEAN,
                amount VARCHAR(40),
                created TIMESTAMP,
                token VARCHAR(36),
                data BLOB,
                note VARCHAR(10)
            )",
            (),
        )
        .await
        .expect("Could not create value_item");

    let amount = Decimal::new(12345, 2);
    let created = datetime!(2024-05-01 10:20:30.123456);
    let token = Uuid::new_v4();
    let id = scope
        .insert(
            "INSERT INTO value_item (flag, amount, created, token, data, note) VALUES (?, ?, ?, ?, ?, ?)",
            params![true, amount, created, token, vec![1u8, 2, 3], None::<String>],
        )
        .await
        .expect("Could not insert the values")
        .expect("The insert must return the generated key");

    let row = scope
        .fetch_one::<(bool, Decimal, time::PrimitiveDateTime, Uuid)>(
            "SELECT flag, amount, created, token FROM value_item WHERE id = ?",
            params![id],
        )
        .await
        .expect("Could not read the values back")
        .expect("The row must exist");
    assert_eq!(row, (true, amount, created, token));

    let row = scope
        .fetch_one::<(Vec<u8>, Option<String>)>(
            "SELECT data, note FROM value_item WHERE id = ?",
            params![id],
        )
        .await
        .expect("Could not read the values back")
        .expect("The row must exist");
    assert_eq!(row, (vec![1, 2, 3], None));

    // Timestamps compare in their text form as well
    let later = scope
        .fetch_one::<i64>(
            "SELECT COUNT(*) FROM value_item WHERE created > ?",
            params![datetime!(2024-05-01 10:20:30.000001)],
        )
        .await
        .expect("Could not compare the timestamps");
    assert_eq!(later, Some(1));

    let table = scope
        .fetch_table("SELECT note FROM value_item", ())
        .await
        .expect("Could not fetch the table");
    assert_eq!(table.get(0, "note"), Some(&Value::Null));
}
