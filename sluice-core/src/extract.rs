use crate::{
    Error, ErrorKind, FromValue, Result, Row, RowLabeled, RowNames, Value,
    stream::{BoxStream, TryStreamExt},
};
use anyhow::Context;
use std::{future::Future, marker::PhantomData};

/// Conversion of a result row into a Rust value.
///
/// Scalars read the first column, tuples read the leading columns by position.
pub trait FromRow: Sized {
    fn from_row(row: RowLabeled) -> Result<Self>;
}

impl FromRow for RowLabeled {
    fn from_row(row: RowLabeled) -> Result<Self> {
        Ok(row)
    }
}

impl FromRow for Row {
    fn from_row(row: RowLabeled) -> Result<Self> {
        Ok(row.values)
    }
}

impl<T: FromValue> FromRow for T {
    fn from_row(row: RowLabeled) -> Result<Self> {
        let label = row.labels.first().cloned().unwrap_or_default();
        let Some(value) = row.values.into_vec().into_iter().next() else {
            return Err(Error::msg("Cannot read a value from a row without columns"));
        };
        T::try_from_value(value).with_context(|| format!("While reading column `{}`", label))
    }
}

macro_rules! impl_from_row_tuple {
    ($($t:ident),+) => {
        impl<$($t: FromValue),+> FromRow for ($($t,)+) {
            fn from_row(row: RowLabeled) -> Result<Self> {
                const LEN: usize = [$(stringify!($t)),+].len();
                if row.values.len() < LEN {
                    return Err(Error::msg(format!(
                        "Expected at least {} columns but the row has {}",
                        LEN,
                        row.values.len()
                    )));
                }
                let labels = row.labels.clone();
                let mut values = row.values.into_vec().into_iter().enumerate();
                Ok(($({
                    let (i, value) = values.next().unwrap_or((LEN, Value::Null));
                    $t::try_from_value(value).with_context(|| {
                        format!(
                            "While reading column `{}`",
                            labels.get(i).map(String::as_str).unwrap_or_default()
                        )
                    })?
                },)+))
            }
        }
    };
}

impl_from_row_tuple!(A);
impl_from_row_tuple!(A, B);
impl_from_row_tuple!(A, B, C);
impl_from_row_tuple!(A, B, C, D);

/// Generic tabular result.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct DataTable {
    pub columns: RowNames,
    pub rows: Vec<Row>,
}

impl DataTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|v| v.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let column = self.column_index(column)?;
        self.rows.get(row)?.get(column)
    }
}

/// Rows to skip and maximum rows to read.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Paging {
    pub fn new(offset: u64, limit: Option<u64>) -> Self {
        Self { offset, limit }
    }

    pub fn limit(limit: u64) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }
}

/// Turns the rows of a query into the value returned to the caller.
pub trait ResultExtractor: Send {
    type Output: Send;

    /// The result is a live cursor, it cannot be produced once the query completed.
    fn streams(&self) -> bool {
        false
    }

    fn extract<'a>(
        self,
        rows: BoxStream<'a, Result<RowLabeled>>,
        paging: Paging,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a
    where
        Self: 'a;
}

/// Feed `f` with the rows inside `paging` until it returns `false`. Errors are never skipped.
async fn paged(
    mut rows: BoxStream<'_, Result<RowLabeled>>,
    paging: Paging,
    mut f: impl FnMut(RowLabeled) -> Result<bool> + Send,
) -> Result<()> {
    let mut skipped = 0;
    let mut taken = 0;
    while let Some(row) = rows.try_next().await? {
        if skipped < paging.offset {
            skipped += 1;
            continue;
        }
        if paging.limit.is_some_and(|limit| taken >= limit) {
            break;
        }
        taken += 1;
        if !f(row)? {
            break;
        }
    }
    Ok(())
}

/// The first row, if any.
pub struct One<T>(PhantomData<fn() -> T>);

impl<T> One<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for One<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromRow + Send> ResultExtractor for One<T> {
    type Output = Option<T>;

    fn extract<'a>(
        self,
        rows: BoxStream<'a, Result<RowLabeled>>,
        paging: Paging,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a
    where
        Self: 'a,
    {
        async move {
            let mut result = None;
            paged(rows, paging, |row| {
                result = Some(T::from_row(row)?);
                Ok(false)
            })
            .await?;
            Ok(result)
        }
    }
}

/// Every row.
pub struct All<T>(PhantomData<fn() -> T>);

impl<T> All<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for All<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FromRow + Send> ResultExtractor for All<T> {
    type Output = Vec<T>;

    fn extract<'a>(
        self,
        rows: BoxStream<'a, Result<RowLabeled>>,
        paging: Paging,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a
    where
        Self: 'a,
    {
        async move {
            let mut result = Vec::new();
            paged(rows, paging, |row| {
                result.push(T::from_row(row)?);
                Ok(true)
            })
            .await?;
            Ok(result)
        }
    }
}

/// Every row, untyped.
#[derive(Default, Debug, Clone, Copy)]
pub struct Table;

impl ResultExtractor for Table {
    type Output = DataTable;

    fn extract<'a>(
        self,
        rows: BoxStream<'a, Result<RowLabeled>>,
        paging: Paging,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a
    where
        Self: 'a,
    {
        async move {
            let mut table = DataTable::default();
            paged(rows, paging, |row| {
                if table.rows.is_empty() {
                    table.columns = row.labels.clone();
                }
                table.rows.push(row.values);
                Ok(true)
            })
            .await?;
            Ok(table)
        }
    }
}

/// Marker asking for a live cursor. Cursors come from `Scope::stream`, the extraction path
/// rejects it before touching the database.
#[derive(Default, Debug, Clone, Copy)]
pub struct Cursor;

impl ResultExtractor for Cursor {
    type Output = ();

    fn streams(&self) -> bool {
        true
    }

    fn extract<'a>(
        self,
        _rows: BoxStream<'a, Result<RowLabeled>>,
        _paging: Paging,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'a
    where
        Self: 'a,
    {
        async move {
            Err(Error::new(ErrorKind::Unsupported(
                "a cursor cannot be extracted from a completed query, use stream".into(),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{self, StreamExt};
    use std::sync::Arc;

    fn rows(count: i64) -> BoxStream<'static, Result<RowLabeled>> {
        let labels: RowNames = Arc::from(vec!["id".to_string(), "name".to_string()]);
        stream::iter((0..count).map(move |i| {
            Ok(RowLabeled::new(
                labels.clone(),
                vec![Value::Int64(i), Value::Varchar(format!("n{}", i))].into(),
            ))
        }))
        .boxed()
    }

    #[tokio::test]
    async fn paging() {
        let all = All::<i64>::new()
            .extract(rows(10), Paging::new(3, Some(4)))
            .await
            .unwrap();
        assert_eq!(all, [3, 4, 5, 6]);
        let one = One::<(i64, String)>::new()
            .extract(rows(10), Paging::new(9, None))
            .await
            .unwrap();
        assert_eq!(one, Some((9, "n9".to_string())));
        let none = One::<i64>::new()
            .extract(rows(2), Paging::new(5, None))
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn table() {
        let table = Table.extract(rows(3), Paging::default()).await.unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(2, "NAME"), Some(&Value::Varchar("n2".into())));
        assert_eq!(table.column_index("missing"), None);
    }

    #[tokio::test]
    async fn errors_are_not_skipped() {
        let failing: BoxStream<'static, Result<RowLabeled>> = stream::iter(vec![Err(Error::msg("broken row"))]).boxed();
        assert!(
            All::<i64>::new()
                .extract(failing, Paging::new(1, None))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn cursor_is_rejected() {
        assert!(Cursor.streams());
        let error = Cursor.extract(rows(1), Paging::default()).await.unwrap_err();
        assert!(matches!(
            crate::error_kind(&error),
            Some(ErrorKind::Unsupported(..))
        ));
    }
}
