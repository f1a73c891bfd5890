use crate::{
    Connection, ConnectionLease, ConnectionPool, ConnectionState, Error, ErrorKind,
    IsolationLevel, KeyCountPolicy, LeaseOwnership, Result, Value, sql_context, truncate_long,
};
use anyhow::Context;

/// Accumulated result of a batch, in submission order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows affected by each parameter set.
    pub affected: Vec<u64>,
    /// Generated keys, when requested.
    pub generated_keys: Vec<i64>,
}

impl BatchOutcome {
    pub fn total(&self) -> u64 {
        self.affected.iter().sum()
    }
}

/// Submits many parameter sets of one statement in chunks.
///
/// When the lease is broker owned and the batch spans more than one chunk, all the chunks run in
/// a single transaction: either every chunk is committed or none is. Caller and context owned
/// connections are never reconfigured, their transaction (if any) decides.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    chunk_size: usize,
    isolation: IsolationLevel,
    key_count_policy: KeyCountPolicy,
}

impl BatchExecutor {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            isolation: IsolationLevel::Default,
            key_count_policy: KeyCountPolicy::Warn,
        }
    }

    /// Isolation applied while the chunks run in their own transaction.
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_key_count_policy(mut self, policy: KeyCountPolicy) -> Self {
        self.key_count_policy = policy;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks needed for `sets` parameter sets.
    pub fn chunk_count(&self, sets: usize) -> usize {
        if self.chunk_size == 0 {
            return 0;
        }
        sets.div_ceil(self.chunk_size)
    }

    /// Run `sql` (already in the dialect form) once per parameter set.
    pub async fn execute<P: ConnectionPool>(
        &self,
        lease: &mut ConnectionLease<'_, P>,
        sql: &str,
        param_sets: &[Vec<Value>],
        return_keys: bool,
    ) -> Result<BatchOutcome> {
        if param_sets.is_empty() {
            return Err(ErrorKind::invalid_argument(format!(
                "A batch needs at least one parameter set:\n{}",
                truncate_long!(sql)
            )));
        }
        if self.chunk_size == 0 {
            return Err(ErrorKind::invalid_argument("The chunk size must be greater than 0"));
        }
        let own_transaction =
            lease.ownership() == LeaseOwnership::Broker && param_sets.len() > self.chunk_size;
        let original = ConnectionState::capture(&**lease);
        if own_transaction {
            if let Err(error) = self.switch_to_manual(&mut **lease).await {
                lease.discard();
                return Err(error.context("While preparing the connection for a chunked batch"));
            }
        }

        let mut result = self.submit(&mut **lease, sql, param_sets, return_keys).await;
        if own_transaction {
            if result.is_ok() {
                if let Err(error) = lease.commit().await {
                    result = Err(error.context(sql_context!("committing the batch of", sql)));
                }
            }
            if result.is_err() {
                if let Err(error) = lease.rollback().await {
                    log::error!(
                        "{:#}",
                        error.context(sql_context!("rolling back the failed batch of", sql))
                    );
                }
            }
            if let Err(error) = original.restore(&mut **lease).await {
                log::error!(
                    "{:#}",
                    error.context("While restoring the connection after a batch, discarding it")
                );
                lease.discard();
            }
        }
        let outcome = result?;

        if return_keys && outcome.generated_keys.len() != param_sets.len() {
            match self.key_count_policy {
                KeyCountPolicy::Warn => log::warn!(
                    "Batch of {} parameter sets returned {} generated keys:\n{}",
                    param_sets.len(),
                    outcome.generated_keys.len(),
                    truncate_long!(sql)
                ),
                KeyCountPolicy::Fail => {
                    return Err(Error::new(ErrorKind::KeyCountMismatch {
                        expected: param_sets.len(),
                        actual: outcome.generated_keys.len(),
                    }));
                }
            }
        }
        Ok(outcome)
    }

    async fn switch_to_manual<C: Connection>(&self, connection: &mut C) -> Result<()> {
        if !self.isolation.is_default() && connection.isolation() != self.isolation {
            connection.set_isolation(self.isolation).await?;
        }
        if connection.auto_commit() {
            connection.set_auto_commit(false).await?;
        }
        Ok(())
    }

    async fn submit<C: Connection>(
        &self,
        connection: &mut C,
        sql: &str,
        param_sets: &[Vec<Value>],
        return_keys: bool,
    ) -> Result<BatchOutcome> {
        let mut query = connection
            .prepare(sql.to_string())
            .await
            .with_context(|| sql_context!("preparing", sql))?;
        let mut outcome = BatchOutcome {
            affected: Vec::with_capacity(param_sets.len()),
            generated_keys: Vec::new(),
        };
        let chunks = self.chunk_count(param_sets.len());
        for (i, chunk) in param_sets.chunks(self.chunk_size).enumerate() {
            let result = connection
                .execute_batch(&mut query, chunk, return_keys)
                .await
                .with_context(|| {
                    format!(
                        "While submitting chunk {}/{} ({} parameter sets) of the query:\n{}",
                        i + 1,
                        chunks,
                        chunk.len(),
                        truncate_long!(sql)
                    )
                })?;
            log::debug!(
                "Chunk {}/{} affected {} rows",
                i + 1,
                chunks,
                result.affected.iter().sum::<u64>()
            );
            outcome.affected.extend(result.affected);
            outcome.generated_keys.extend(result.keys);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_accounting() {
        let batch = BatchExecutor::new(10);
        assert_eq!(batch.chunk_count(25), 3);
        assert_eq!(batch.chunk_count(20), 2);
        assert_eq!(batch.chunk_count(1), 1);
        assert_eq!(batch.chunk_count(0), 0);
        let sets: Vec<Vec<Value>> = (0..25).map(|i| vec![Value::Int64(i)]).collect();
        let sizes: Vec<usize> = sets.chunks(batch.chunk_size()).map(<[_]>::len).collect();
        assert_eq!(sizes, [10, 10, 5]);
    }

    #[test]
    fn outcome_total() {
        let outcome = BatchOutcome {
            affected: vec![1, 0, 2],
            generated_keys: vec![7, 8],
        };
        assert_eq!(outcome.total(), 3);
    }
}
