use crate::{
    ConnectionBroker, ConnectionPool, ErrorKind, FromValue, Result, SqlWriter, Value,
    executor::{execute_sql, fetch_first_value},
    now_utc,
};
use anyhow::Context;
use std::time::Duration;
use time::PrimitiveDateTime;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

/// Holder of a lock row nobody holds.
pub const UNLOCKED: &str = "";

/// Longest lock name the backing table accepts.
pub const MAX_LOCK_NAME_LEN: usize = 64;

struct LockSql {
    insert: String,
    select: String,
    acquire: String,
    swap: String,
}

/// Advisory locks stored as rows of a table, usable across processes sharing the database.
///
/// A lock row holds the token of its holder, or [`UNLOCKED`]. Taking and giving back a lock are
/// conditional updates on the expected holder. A holder that stops refreshing its lock for longer
/// than the `expire_after` of a contender is considered gone and loses the lock.
pub struct RowLock<P: ConnectionPool> {
    broker: ConnectionBroker<P>,
    table: String,
    sql: LockSql,
}

impl<P: ConnectionPool> RowLock<P> {
    /// Create the lock table if missing.
    pub async fn new(broker: ConnectionBroker<P>, writer: &dyn SqlWriter, table: &str) -> Result<Self> {
        if table.trim().is_empty() {
            return Err(ErrorKind::invalid_argument("The lock table name is empty"));
        }
        let mut create = String::with_capacity(160);
        writer.write_create_lock_table(&mut create, table);
        let mut sql = LockSql {
            insert: String::with_capacity(128),
            select: String::with_capacity(64),
            acquire: String::with_capacity(128),
            swap: String::with_capacity(128),
        };
        writer.write_insert_lock(&mut sql.insert, table);
        writer.write_select_lock(&mut sql.select, table);
        writer.write_acquire_lock(&mut sql.acquire, table);
        writer.write_swap_lock(&mut sql.swap, table);
        let mut lease = broker.borrow().await?;
        execute_sql(&mut *lease, &create, &[])
            .await
            .with_context(|| format!("While creating the lock table `{}`", table))?;
        drop(lease);
        Ok(Self {
            broker,
            table: table.to_string(),
            sql,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn check_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ErrorKind::invalid_argument("The lock name is empty"));
        }
        if name.len() > MAX_LOCK_NAME_LEN {
            return Err(ErrorKind::invalid_argument(format!(
                "The lock name `{}` is longer than {} bytes",
                name, MAX_LOCK_NAME_LEN
            )));
        }
        Ok(())
    }

    /// Take the lock if it is free or abandoned, returns the token proving ownership.
    pub async fn try_lock(&self, name: &str, expire_after: Duration) -> Result<Option<String>> {
        Self::check_name(name)?;
        if expire_after.is_zero() {
            return Err(ErrorKind::invalid_argument("expire_after must be greater than 0"));
        }
        let mut lease = self.broker.borrow().await?;
        let lock_name = Value::Varchar(name.to_string());
        let now = now_utc();
        let existing =
            fetch_first_value(&mut *lease, &self.sql.select, &[lock_name.clone()]).await?;
        if existing.is_none() {
            let inserted = execute_sql(
                &mut *lease,
                &self.sql.insert,
                &[
                    lock_name.clone(),
                    Value::Varchar(UNLOCKED.into()),
                    Value::Timestamp(now),
                    Value::Timestamp(now),
                ],
            )
            .await;
            if let Err(error) = inserted {
                // Lost the insert race, the row exists now
                if fetch_first_value(&mut *lease, &self.sql.select, &[lock_name.clone()])
                    .await?
                    .is_none()
                {
                    return Err(error);
                }
            }
        }
        let threshold = time::Duration::try_from(expire_after)
            .ok()
            .and_then(|v| now.checked_sub(v))
            .unwrap_or(PrimitiveDateTime::MIN);
        let token = Uuid::new_v4().to_string();
        let affected = execute_sql(
            &mut *lease,
            &self.sql.acquire,
            &[
                Value::Varchar(token.clone()),
                Value::Timestamp(now),
                lock_name,
                Value::Varchar(UNLOCKED.into()),
                Value::Timestamp(threshold),
            ],
        )
        .await?;
        if affected.rows_affected == 0 {
            return Ok(None);
        }
        log::debug!("Lock {}.{} taken by {}", self.table, name, token);
        Ok(Some(token))
    }

    /// Poll [`RowLock::try_lock`] every `retry_interval` until it succeeds or `timeout` elapses.
    pub async fn lock(
        &self,
        name: &str,
        expire_after: Duration,
        timeout: Duration,
        retry_interval: Duration,
    ) -> Result<Option<String>> {
        if retry_interval.is_zero() {
            return Err(ErrorKind::invalid_argument("retry_interval must be greater than 0"));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(token) = self.try_lock(name, expire_after).await? {
                return Ok(Some(token));
            }
            let now = Instant::now();
            if now >= deadline {
                log::debug!("Timed out after {:?} waiting for lock {}.{}", timeout, self.table, name);
                return Ok(None);
            }
            sleep(retry_interval.min(deadline - now)).await;
        }
    }

    /// Extend the lock held with `token`, returns `false` if it is not held with it anymore.
    pub async fn refresh(&self, name: &str, token: &str) -> Result<bool> {
        self.swap(name, token, token).await
    }

    /// Give the lock back, returns `false` if it is not held with `token`.
    pub async fn unlock(&self, name: &str, token: &str) -> Result<bool> {
        let released = self.swap(name, token, UNLOCKED).await?;
        if released {
            log::debug!("Lock {}.{} released by {}", self.table, name, token);
        }
        Ok(released)
    }

    /// The current holder token, `None` when free.
    pub async fn holder(&self, name: &str) -> Result<Option<String>> {
        Self::check_name(name)?;
        let mut lease = self.broker.borrow().await?;
        let holder = fetch_first_value(
            &mut *lease,
            &self.sql.select,
            &[Value::Varchar(name.to_string())],
        )
        .await?;
        match holder {
            None => Ok(None),
            Some(value) => {
                let holder = String::try_from_value(value)?;
                Ok(if holder == UNLOCKED { None } else { Some(holder) })
            }
        }
    }

    async fn swap(&self, name: &str, expected: &str, holder: &str) -> Result<bool> {
        Self::check_name(name)?;
        if expected == UNLOCKED {
            return Err(ErrorKind::invalid_argument("The lock token is empty"));
        }
        let mut lease = self.broker.borrow().await?;
        let affected = execute_sql(
            &mut *lease,
            &self.sql.swap,
            &[
                Value::Varchar(holder.to_string()),
                Value::Timestamp(now_utc()),
                Value::Varchar(name.to_string()),
                Value::Varchar(expected.to_string()),
            ],
        )
        .await?;
        Ok(affected.rows_affected > 0)
    }
}
