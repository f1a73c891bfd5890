use crate::{
    ConnectionBroker, ConnectionPool, Error, ErrorKind, FromValue, Result, SqlWriter, Value,
    executor::{execute_sql, fetch_first_value},
    now_utc,
    util::lock,
};
use anyhow::Context;
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex},
};

/// Conditional updates attempted by one refill before giving up.
pub const MAX_REFILL_ATTEMPTS: usize = 64;

/// Longest sequence name the backing table accepts.
pub const MAX_SEQUENCE_NAME_LEN: usize = 64;

type NamedLocks = Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>;

/// One lock per (table, sequence), shared by every allocator of the process and never removed.
fn named_lock(table: &str, name: &str) -> Arc<tokio::sync::Mutex<()>> {
    static LOCKS: LazyLock<NamedLocks> = LazyLock::new(Default::default);
    lock(&LOCKS)
        .entry((table.to_string(), name.to_string()))
        .or_default()
        .clone()
}

#[derive(Debug, Clone, Copy)]
struct Range {
    low: i64,
    high: i64,
    buffer: i64,
}

struct SequenceSql {
    create: String,
    select: String,
    insert: String,
    advance: String,
    reset: String,
}

impl SequenceSql {
    fn new(writer: &dyn SqlWriter, table: &str) -> Self {
        let build = |f: fn(&dyn SqlWriter, &mut String, &str)| {
            let mut out = String::with_capacity(128);
            f(writer, &mut out, table);
            out
        };
        Self {
            create: build(|w, out, t| w.write_create_sequence_table(out, t)),
            select: build(|w, out, t| w.write_select_sequence(out, t)),
            insert: build(|w, out, t| w.write_insert_sequence(out, t)),
            advance: build(|w, out, t| w.write_advance_sequence(out, t)),
            reset: build(|w, out, t| w.write_reset_sequence(out, t)),
        }
    }
}

/// Hands out unique integers, reserving them from a table `buffer` at a time.
///
/// The values in the reserved range are served from memory. When the range is exhausted the next
/// one is reserved with a conditional update on the previous `next_val`, so concurrent allocators
/// (in this process or elsewhere) never reserve overlapping ranges. Values reserved but not handed
/// out before the process ends are lost, never reissued.
pub struct SequenceAllocator<P: ConnectionPool> {
    broker: ConnectionBroker<P>,
    table: String,
    name: String,
    sql: SequenceSql,
    lock: Arc<tokio::sync::Mutex<()>>,
    range: Mutex<Range>,
}

impl<P: ConnectionPool> SequenceAllocator<P> {
    /// Create the table and the sequence row if missing, then move the sequence forward to
    /// `start` if it is behind.
    pub async fn new(
        broker: ConnectionBroker<P>,
        writer: &dyn SqlWriter,
        table: &str,
        name: &str,
        start: i64,
        buffer: u64,
    ) -> Result<Self> {
        if table.trim().is_empty() {
            return Err(ErrorKind::invalid_argument("The sequence table name is empty"));
        }
        if name.trim().is_empty() {
            return Err(ErrorKind::invalid_argument("The sequence name is empty"));
        }
        if name.len() > MAX_SEQUENCE_NAME_LEN {
            return Err(ErrorKind::invalid_argument(format!(
                "The sequence name `{}` is longer than {} bytes",
                name, MAX_SEQUENCE_NAME_LEN
            )));
        }
        let buffer = Self::check_buffer(buffer)?;
        let result = Self {
            broker,
            table: table.to_string(),
            name: name.to_string(),
            sql: SequenceSql::new(writer, table),
            lock: named_lock(table, name),
            range: Mutex::new(Range {
                low: 0,
                high: 0,
                buffer,
            }),
        };
        {
            let _guard = result.lock.lock().await;
            result
                .initialize(start)
                .await
                .with_context(|| format!("While initializing sequence {}", result))?;
        }
        Ok(result)
    }

    fn check_buffer(buffer: u64) -> Result<i64> {
        match i64::try_from(buffer) {
            Ok(buffer) if buffer > 0 => Ok(buffer),
            _ => Err(ErrorKind::invalid_argument(format!(
                "The sequence buffer must be between 1 and {}, got {}",
                i64::MAX,
                buffer
            ))),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> u64 {
        lock(&self.range).buffer as u64
    }

    /// Values still reserved in memory.
    pub fn remaining(&self) -> u64 {
        let range = lock(&self.range);
        (range.high - range.low) as u64
    }

    /// The next value of the sequence.
    pub async fn next(&self) -> Result<i64> {
        let _guard = self.lock.lock().await;
        let buffer = {
            let mut range = lock(&self.range);
            if range.low < range.high {
                let value = range.low;
                range.low += 1;
                return Ok(value);
            }
            range.buffer
        };
        let (low, high) = self.refill(buffer).await?;
        let mut range = lock(&self.range);
        range.low = low + 1;
        range.high = high;
        Ok(low)
    }

    /// Drop the reserved range and apply the new `start` and `buffer`. The persisted value only
    /// moves forward: asking for a start below the values already reserved has no effect on it.
    pub async fn reset(&self, start: i64, buffer: u64) -> Result<()> {
        let buffer = Self::check_buffer(buffer)?;
        let _guard = self.lock.lock().await;
        self.initialize(start)
            .await
            .with_context(|| format!("While resetting sequence {}", self))?;
        *lock(&self.range) = Range {
            low: 0,
            high: 0,
            buffer,
        };
        Ok(())
    }

    async fn initialize(&self, start: i64) -> Result<()> {
        let mut lease = self.broker.borrow().await?;
        execute_sql(&mut *lease, &self.sql.create, &[]).await?;
        let name = Value::Varchar(self.name.clone());
        let existing = fetch_first_value(&mut *lease, &self.sql.select, &[name.clone()]).await?;
        if existing.is_none() {
            let now = Value::Timestamp(now_utc());
            let inserted = execute_sql(
                &mut *lease,
                &self.sql.insert,
                &[name.clone(), Value::Int64(start), now.clone(), now],
            )
            .await;
            if let Err(error) = inserted {
                // Another allocator may have created the row in the meantime
                if fetch_first_value(&mut *lease, &self.sql.select, &[name.clone()])
                    .await?
                    .is_none()
                {
                    return Err(error);
                }
                log::debug!("Sequence {} created concurrently", self);
            } else {
                log::debug!("Sequence {} created at {}", self, start);
            }
        }
        let affected = execute_sql(
            &mut *lease,
            &self.sql.reset,
            &[
                Value::Int64(start),
                Value::Timestamp(now_utc()),
                name,
                Value::Int64(start),
            ],
        )
        .await?;
        if affected.rows_affected > 0 {
            log::debug!("Sequence {} moved forward to {}", self, start);
        }
        Ok(())
    }

    /// Reserve `[low, low + buffer)`.
    async fn refill(&self, buffer: i64) -> Result<(i64, i64)> {
        let mut lease = self.broker.borrow().await?;
        let name = Value::Varchar(self.name.clone());
        for attempt in 1..=MAX_REFILL_ATTEMPTS {
            let Some(current) =
                fetch_first_value(&mut *lease, &self.sql.select, &[name.clone()]).await?
            else {
                return Err(Error::msg(format!(
                    "The row of sequence {} disappeared",
                    self
                )));
            };
            let low = i64::try_from_value(current)
                .with_context(|| format!("While reading next_val of sequence {}", self))?;
            let high = low.checked_add(buffer).ok_or_else(|| {
                Error::msg(format!("Sequence {} overflowed past {}", self, low))
            })?;
            let affected = execute_sql(
                &mut *lease,
                &self.sql.advance,
                &[
                    Value::Int64(high),
                    Value::Timestamp(now_utc()),
                    Value::Int64(low),
                    name.clone(),
                ],
            )
            .await?;
            if affected.rows_affected > 0 {
                log::debug!("Sequence {} reserved [{}, {})", self, low, high);
                return Ok((low, high));
            }
            log::debug!(
                "Sequence {} refill lost the race at {} (attempt {})",
                self,
                low,
                attempt
            );
        }
        Err(Error::new(ErrorKind::Contention {
            target: format!("sequence {}", self),
            attempts: MAX_REFILL_ATTEMPTS,
        }))
    }
}

impl<P: ConnectionPool> std::fmt::Display for SequenceAllocator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenericSqlWriter;

    #[test]
    fn named_locks_are_shared() {
        let a = named_lock("seq_tbl", "order_id");
        let b = named_lock("seq_tbl", "order_id");
        let c = named_lock("seq_tbl", "invoice_id");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn statements() {
        let sql = SequenceSql::new(&GenericSqlWriter, "seq_tbl");
        assert_eq!(
            sql.select,
            r#"SELECT next_val FROM "seq_tbl" WHERE seq_name = ?"#
        );
        assert_eq!(
            sql.reset,
            r#"UPDATE "seq_tbl" SET next_val = ?, update_time = ? WHERE seq_name = ? AND next_val < ?"#
        );
        assert!(sql.create.starts_with(r#"CREATE TABLE IF NOT EXISTS "seq_tbl""#));
    }
}
