use crate::{
    CBox, SqliteDriver, SqlitePrepared, error_message_from_ptr,
    extract::{extract_name, extract_value},
};
use async_stream::try_stream;
use libsqlite3_sys::{
    SQLITE_DONE, SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READWRITE,
    SQLITE_OPEN_URI, SQLITE_ROW, sqlite3, sqlite3_busy_timeout, sqlite3_close,
    sqlite3_column_count, sqlite3_db_handle, sqlite3_errmsg, sqlite3_exec, sqlite3_finalize,
    sqlite3_free, sqlite3_get_autocommit, sqlite3_last_insert_rowid, sqlite3_open_v2,
    sqlite3_prepare_v2, sqlite3_reset, sqlite3_step, sqlite3_total_changes64,
};
use sluice_core::{
    Connection, Context, Driver, Error, Executor, IsolationLevel, Query, QueryResult, Result, Row,
    RowLabeled, RowNames, RowsAffected, SqlWriter,
    future::Either,
    sql_context,
    stream::{Stream, StreamExt},
    truncate_long,
};
use std::{
    borrow::Cow,
    ffi::{CStr, CString, c_char, c_int, c_void},
    pin::pin,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
    time::Duration,
};
use tokio::task::spawn_blocking;

/// Milliseconds a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: c_int = 5000;

pub struct SqliteConnection {
    pub(crate) connection: CBox<*mut sqlite3>,
    driver: SqliteDriver,
    auto_commit: bool,
    isolation: IsolationLevel,
}

impl SqliteConnection {
    /// An explicit transaction is open on the connection.
    pub fn in_transaction(&self) -> bool {
        unsafe { sqlite3_get_autocommit(*self.connection) == 0 }
    }

    /// Run one or more statements, discarding any row.
    pub async fn exec(&mut self, sql: String) -> Result<()> {
        let connection = AtomicPtr::new(*self.connection);
        spawn_blocking(move || unsafe {
            let connection = connection.load(Ordering::Relaxed);
            let context = sql_context!("executing", sql);
            let query = CString::new(sql)
                .map_err(|e| Error::new(e).context(context.clone()))?;
            let mut message: *mut c_char = ptr::null_mut();
            let rc = sqlite3_exec(connection, query.as_ptr(), None, ptr::null_mut(), &mut message);
            if rc != SQLITE_OK {
                let error = Error::msg(error_message_from_ptr(message)).context(context);
                sqlite3_free(message as *mut c_void);
                log::error!("{:#}", error);
                return Err(error);
            }
            Ok(())
        })
        .await?
    }

    async fn exec_with(&mut self, write: impl FnOnce(&mut String)) -> Result<()> {
        let mut sql = String::with_capacity(32);
        write(&mut sql);
        self.exec(sql).await
    }

    pub(crate) async fn prepare_statement(&mut self, query: String) -> Result<SqlitePrepared> {
        let connection = AtomicPtr::new(*self.connection);
        let statement = spawn_blocking(move || unsafe {
            let connection = connection.load(Ordering::Relaxed);
            let context = sql_context!("preparing", query);
            let sql = match CString::new(query.as_bytes()) {
                Ok(sql) => sql,
                Err(e) => {
                    let error = Error::new(e)
                        .context("Could not create a CString from the query String")
                        .context(context);
                    log::error!("{:#}", error);
                    return Err(error);
                }
            };
            let mut statement = CBox::new(ptr::null_mut(), |p| {
                sqlite3_finalize(p);
            });
            let mut tail: *const c_char = ptr::null();
            let rc = sqlite3_prepare_v2(
                connection,
                sql.as_ptr(),
                -1,
                &mut *statement,
                &mut tail,
            );
            if rc != SQLITE_OK {
                let error =
                    Error::msg(error_message_from_ptr(sqlite3_errmsg(connection))).context(context);
                log::error!("{:#}", error);
                return Err(error);
            }
            if statement.is_null() {
                let error = Error::msg("The query does not contain any statement").context(context);
                log::error!("{:#}", error);
                return Err(error);
            }
            if !tail.is_null()
                && CStr::from_ptr(tail)
                    .to_bytes()
                    .iter()
                    .any(|v| !v.is_ascii_whitespace() && *v != b';')
            {
                let error =
                    Error::msg("Cannot prepare more than one statement at a time").context(context);
                log::error!("{:#}", error);
                return Err(error);
            }
            Ok(statement)
        })
        .await??;
        Ok(SqlitePrepared::new(statement))
    }

    /// Step the statement to completion. Rows are yielded as they come, statements that can
    /// write end with the number of rows they changed and the rowid of the row they inserted.
    pub(crate) fn run_prepared<'s>(
        prepared: &'s mut SqlitePrepared,
    ) -> impl Stream<Item = Result<QueryResult>> + Send + 's {
        try_stream! {
            let (count, changes_before, rowid_before) = unsafe {
                sqlite3_reset(*prepared.statement);
                let db = sqlite3_db_handle(*prepared.statement);
                (
                    sqlite3_column_count(*prepared.statement),
                    sqlite3_total_changes64(db),
                    sqlite3_last_insert_rowid(db),
                )
            };
            let labels = (0..count)
                .map(|i| extract_name(*prepared.statement, i))
                .collect::<Result<RowNames>>()?;
            loop {
                let rc = unsafe { sqlite3_step(*prepared.statement) };
                match rc {
                    SQLITE_ROW => {
                        let values = (0..count)
                            .map(|i| extract_value(*prepared.statement, i))
                            .collect::<Result<Row>>()?;
                        yield QueryResult::Row(RowLabeled::new(labels.clone(), values));
                    }
                    SQLITE_DONE => {
                        let affected = unsafe {
                            let db = sqlite3_db_handle(*prepared.statement);
                            let changed = (sqlite3_total_changes64(db) - changes_before).max(0) as u64;
                            // Updates and deletes leave the rowid of an earlier insert behind
                            let rowid = sqlite3_last_insert_rowid(db);
                            sqlite3_reset(*prepared.statement);
                            (count == 0).then(|| RowsAffected {
                                rows_affected: changed,
                                inserted_id: (changed > 0 && rowid != rowid_before)
                                    .then_some(rowid),
                            })
                        };
                        if let Some(affected) = affected {
                            yield QueryResult::Affected(affected);
                        }
                        break;
                    }
                    _ => {
                        let error = unsafe {
                            let db = sqlite3_db_handle(*prepared.statement);
                            let error = Error::msg(error_message_from_ptr(sqlite3_errmsg(db)));
                            sqlite3_reset(*prepared.statement);
                            error
                        }
                        .context(format!(
                            "While running the query:\n{}",
                            truncate_long!(prepared.to_string())
                        ));
                        log::error!("{:#}", error);
                        Err::<(), _>(error)?;
                    }
                }
            }
        }
    }

    fn run_raw<'s>(&'s mut self, sql: String) -> impl Stream<Item = Result<QueryResult>> + Send + 's {
        try_stream! {
            let mut prepared = self.prepare_statement(sql).await?;
            let mut stream = pin!(Self::run_prepared(&mut prepared));
            while let Some(value) = stream.next().await {
                yield value?;
            }
        }
    }
}

impl Executor for SqliteConnection {
    type Driver = SqliteDriver;

    fn driver(&self) -> &Self::Driver {
        &self.driver
    }

    async fn prepare(&mut self, query: String) -> Result<Query<SqliteDriver>> {
        Ok(Query::Prepared(self.prepare_statement(query).await?))
    }

    fn run<'s>(
        &'s mut self,
        query: &'s mut Query<SqliteDriver>,
    ) -> impl Stream<Item = Result<QueryResult>> + Send + 's {
        match query {
            Query::Raw(sql) => Either::Left(self.run_raw(sql.clone())),
            Query::Prepared(prepared) => Either::Right(Self::run_prepared(prepared)),
        }
    }
}

impl Connection for SqliteConnection {
    /// Open `sqlite://<path>[?<uri parameters>]`, the path is handed to sqlite as a `file:` URI.
    async fn connect(url: Cow<'static, str>) -> Result<Self> {
        let prefix = format!("{}://", SqliteDriver::NAME);
        let Some(path) = url.strip_prefix(&prefix) else {
            let error = Error::msg(format!(
                "Expected sqlite connection url to start with `{}`, got `{}`",
                prefix, url
            ));
            log::error!("{:#}", error);
            return Err(error);
        };
        let uri = if path.starts_with("file:") {
            path.to_string()
        } else {
            format!("file:{}", path)
        };
        let in_memory = uri.contains(":memory:") || uri.contains("mode=memory");
        let read_only = uri.contains("mode=ro");
        let c_uri = CString::new(uri.as_str())
            .with_context(|| format!("Error while decoding connection URL: `{}`", url))?;
        let mut connection = CBox::new(ptr::null_mut(), |p| unsafe {
            sqlite3_close(p);
        });
        let rc = unsafe {
            sqlite3_open_v2(
                c_uri.as_ptr(),
                &mut *connection,
                SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_URI | SQLITE_OPEN_FULLMUTEX,
                ptr::null(),
            )
        };
        if rc != SQLITE_OK {
            let message = if connection.is_null() {
                format!("sqlite3_open_v2 failed with code {}", rc)
            } else {
                error_message_from_ptr(unsafe { sqlite3_errmsg(*connection) })
            };
            let error = Error::msg(message).context(format!("Could not open `{}`", url));
            log::error!("{:#}", error);
            return Err(error);
        }
        unsafe {
            sqlite3_busy_timeout(*connection, DEFAULT_BUSY_TIMEOUT_MS);
        }
        let mut result = Self {
            connection,
            driver: SqliteDriver::new(),
            auto_commit: true,
            isolation: IsolationLevel::Serializable,
        };
        if !in_memory && !read_only {
            if let Err(error) = result.exec("PRAGMA journal_mode=WAL".into()).await {
                log::warn!("Could not enable WAL on `{}`: {:#}", url, error);
            }
        }
        Ok(result)
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled == self.auto_commit {
            return Ok(());
        }
        let writer = self.driver.sql_writer();
        if enabled {
            if self.in_transaction() {
                self.exec_with(|sql| writer.write_transaction_commit(sql))
                    .await?;
            }
        } else if !self.in_transaction() {
            self.exec_with(|sql| writer.write_transaction_begin(sql))
                .await?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    async fn set_isolation(&mut self, level: IsolationLevel) -> Result<()> {
        if level.is_default() {
            return Ok(());
        }
        let writer = self.driver.sql_writer();
        self.exec_with(|sql| writer.write_isolation_level(sql, level))
            .await?;
        self.isolation = level;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let writer = self.driver.sql_writer();
        if self.in_transaction() {
            self.exec_with(|sql| writer.write_transaction_commit(sql))
                .await?;
        }
        if !self.auto_commit {
            self.exec_with(|sql| writer.write_transaction_begin(sql))
                .await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let writer = self.driver.sql_writer();
        if self.in_transaction() {
            self.exec_with(|sql| writer.write_transaction_rollback(sql))
                .await?;
        }
        if !self.auto_commit {
            self.exec_with(|sql| writer.write_transaction_begin(sql))
                .await?;
        }
        Ok(())
    }

    /// Sqlite has no statement timeout, the timeout bounds how long a statement waits for a lock.
    fn set_query_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let millis = match timeout {
            Some(timeout) => timeout.as_millis().min(c_int::MAX as u128) as c_int,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };
        unsafe {
            sqlite3_busy_timeout(*self.connection, millis);
        }
        Ok(())
    }
}
