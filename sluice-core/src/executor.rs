use crate::{
    Driver, Query, QueryResult, Result, RowLabeled, RowsAffected, Value, sql_context,
    stream::{Stream, StreamExt, TryStreamExt},
};
use anyhow::Context;
use std::{future::Future, pin::pin};

pub trait Executor: Send + Sized {
    type Driver: Driver;

    fn driver(&self) -> &Self::Driver;

    /// Prepare the statement on the backend, returns a handle ready for binding.
    fn prepare(
        &mut self,
        query: String,
    ) -> impl Future<Output = Result<Query<Self::Driver>>> + Send;

    /// General method to send any query and return any result type (either row or count).
    ///
    /// A prepared query is left reset, with its bindings untouched, once the stream is exhausted
    /// so that it can be executed again.
    fn run<'s>(
        &'s mut self,
        query: &'s mut Query<Self::Driver>,
    ) -> impl Stream<Item = Result<QueryResult>> + Send + 's;

    /// Execute the query and returns the rows.
    fn fetch<'s>(
        &'s mut self,
        query: &'s mut Query<Self::Driver>,
    ) -> impl Stream<Item = Result<RowLabeled>> + Send + 's {
        self.run(query).filter_map(|v| async move {
            match v {
                Ok(QueryResult::Row(v)) => Some(Ok(v)),
                Err(e) => Some(Err(e)),
                _ => None,
            }
        })
    }

    /// Execute the query and return the total number of rows affected.
    fn execute<'s>(
        &'s mut self,
        query: &'s mut Query<Self::Driver>,
    ) -> impl Future<Output = Result<RowsAffected>> + Send + 's {
        self.run(query)
            .filter_map(|v| async move {
                match v {
                    Ok(QueryResult::Affected(v)) => Some(Ok(v)),
                    Err(e) => Some(Err(e)),
                    _ => None,
                }
            })
            .try_collect()
    }
}

/// Prepare `sql`, bind `params` and execute it.
pub(crate) async fn execute_sql<E: Executor>(
    executor: &mut E,
    sql: &str,
    params: &[Value],
) -> Result<RowsAffected> {
    let mut query = executor
        .prepare(sql.to_string())
        .await
        .with_context(|| sql_context!("preparing", sql))?;
    query.bind_all(params)?;
    executor
        .execute(&mut query)
        .await
        .with_context(|| sql_context!("executing", sql))
}

/// Prepare `sql`, bind `params` and read the first column of the first row.
pub(crate) async fn fetch_first_value<E: Executor>(
    executor: &mut E,
    sql: &str,
    params: &[Value],
) -> Result<Option<Value>> {
    let mut query = executor
        .prepare(sql.to_string())
        .await
        .with_context(|| sql_context!("preparing", sql))?;
    query.bind_all(params)?;
    let mut rows = pin!(executor.fetch(&mut query));
    let row = rows
        .try_next()
        .await
        .with_context(|| sql_context!("fetching", sql))?;
    Ok(row.and_then(|row| row.values.into_vec().into_iter().next()))
}
