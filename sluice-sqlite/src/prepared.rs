use crate::{CBox, error_message_from_ptr};
use libsqlite3_sys::*;
use sluice_core::{AsValue, Error, Prepared, Result, TIMESTAMP_FORMAT, Value, truncate_long};
use std::{
    ffi::{CStr, c_char, c_int, c_void},
    fmt::{self, Display},
};

pub struct SqlitePrepared {
    pub(crate) statement: CBox<*mut sqlite3_stmt>,
    pub(crate) index: u64,
}

impl SqlitePrepared {
    pub(crate) fn new(statement: CBox<*mut sqlite3_stmt>) -> Self {
        unsafe {
            sqlite3_clear_bindings(*statement);
        }
        Self {
            statement,
            index: 0,
        }
    }

    pub fn parameter_count(&self) -> u64 {
        unsafe { sqlite3_bind_parameter_count(*self.statement) as u64 }
    }

    fn bind_text(&mut self, index: c_int, text: &str) -> c_int {
        unsafe {
            sqlite3_bind_text(
                *self.statement,
                index,
                text.as_ptr() as *const c_char,
                text.len() as c_int,
                SQLITE_TRANSIENT(),
            )
        }
    }
}

impl Prepared for SqlitePrepared {
    fn bind<V: AsValue>(&mut self, value: V) -> Result<&mut Self> {
        self.bind_index(value, self.index)
    }

    fn bind_index<V: AsValue>(&mut self, value: V, index: u64) -> Result<&mut Self> {
        let count = self.parameter_count();
        if index >= count {
            let error = Error::msg(format!(
                "Cannot bind parameter {} (from 0), the query has {} parameters:\n{}",
                index,
                count,
                truncate_long!(self.to_string())
            ));
            log::error!("{:#}", error);
            return Err(error);
        }
        let position = index as c_int + 1;
        let value = value.as_value();
        let rc = unsafe {
            match &value {
                Value::Null => sqlite3_bind_null(*self.statement, position),
                Value::Boolean(v) => sqlite3_bind_int(*self.statement, position, *v as c_int),
                Value::Int64(v) => sqlite3_bind_int64(*self.statement, position, *v),
                Value::Float64(v) => sqlite3_bind_double(*self.statement, position, *v),
                Value::Decimal(v) => self.bind_text(position, &v.to_string()),
                Value::Varchar(v) => self.bind_text(position, v),
                Value::Blob(v) => sqlite3_bind_blob(
                    *self.statement,
                    position,
                    v.as_ptr() as *const c_void,
                    v.len() as c_int,
                    SQLITE_TRANSIENT(),
                ),
                Value::Timestamp(v) => {
                    let text = v.format(TIMESTAMP_FORMAT).map_err(|e| {
                        Error::new(e).context(format!("Cannot format the timestamp `{}`", v))
                    })?;
                    self.bind_text(position, &text)
                }
                Value::Uuid(v) => self.bind_text(position, &v.to_string()),
            }
        };
        if rc != SQLITE_OK {
            let error = unsafe {
                Error::msg(error_message_from_ptr(sqlite3_errmsg(sqlite3_db_handle(
                    *self.statement,
                ))))
            }
            .context(format!(
                "Cannot bind parameter {} to query:\n{}",
                index,
                truncate_long!(self.to_string())
            ));
            log::error!("{:#}", error);
            return Err(error);
        }
        self.index = index + 1;
        Ok(self)
    }

    fn clear_bindings(&mut self) -> Result<&mut Self> {
        unsafe {
            sqlite3_clear_bindings(*self.statement);
        }
        self.index = 0;
        Ok(self)
    }
}

impl Display for SqlitePrepared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sql = unsafe { sqlite3_sql(*self.statement) };
        if sql.is_null() {
            return write!(f, "{:p}", *self.statement);
        }
        write!(f, "{}", unsafe { CStr::from_ptr(sql) }.to_string_lossy())
    }
}
