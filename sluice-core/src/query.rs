use crate::{Driver, Error, Prepared, Result, Value, truncate_long};
use std::{
    fmt::{self, Display},
    sync::Arc,
};

/// Statement handed to [`crate::Executor::run`]: plain SQL text, or a statement the driver
/// prepared and parameters can be bound to.
#[derive(Debug)]
pub enum Query<D: Driver> {
    Raw(String),
    Prepared(D::Prepared),
}

impl<D: Driver> Query<D> {
    /// Drop the current parameters and bind `values` positionally.
    pub fn bind_all<'v>(&mut self, values: impl IntoIterator<Item = &'v Value>) -> Result<&mut Self> {
        let Self::Prepared(prepared) = self else {
            return Err(Error::msg("Parameters can only be bound to a prepared statement"));
        };
        prepared.clear_bindings()?;
        for value in values {
            prepared.bind(value.clone())?;
        }
        Ok(self)
    }
}

impl<D: Driver> From<&str> for Query<D> {
    fn from(sql: &str) -> Self {
        Query::Raw(sql.to_string())
    }
}

impl<D: Driver> From<String> for Query<D> {
    fn from(sql: String) -> Self {
        Query::Raw(sql)
    }
}

impl<D: Driver> Display for Query<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Raw(sql) => write!(f, "{}", truncate_long!(sql)),
            Query::Prepared(prepared) => prepared.fmt(f),
        }
    }
}

/// Outcome of a statement that writes.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsAffected {
    pub rows_affected: u64,
    /// Key of the row the statement inserted. Never set by updates or deletes.
    pub inserted_id: Option<i64>,
}

/// Sums the counts, the latest inserted key wins.
impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for affected in iter {
            self.rows_affected += affected.rows_affected;
            self.inserted_id = affected.inserted_id.or(self.inserted_id);
        }
    }
}

/// Column names, shared by every row of a result.
pub type RowNames = Arc<[String]>;
pub type Row = Box<[Value]>;

/// A row together with the names of its columns, `values[i]` belongs to `labels[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLabeled {
    pub labels: RowNames,
    pub values: Row,
}

impl RowLabeled {
    pub fn new(labels: RowNames, values: Row) -> Self {
        Self { labels, values }
    }
}

/// Item streamed by [`crate::Executor::run`].
#[derive(Debug)]
pub enum QueryResult {
    Row(RowLabeled),
    Affected(RowsAffected),
}
