use crate::Error;

/// Classification of the failures raised by sluice itself.
///
/// Errors travel as [`crate::Error`] (`anyhow`). Driver failures are wrapped with the SQL they
/// were running and carry no kind. Failures detected by this crate carry an `ErrorKind` that can
/// be recovered with [`error_kind`], regardless of how much context was attached on the way up.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any I/O: empty names, non positive sizes, arity mismatches.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A write was attempted through an executor configured as read-only.
    #[error("The executor is read-only, refusing to run: {0}")]
    ReadOnly(String),
    /// The requested combination cannot be served by this path.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// The transaction was rolled back instead of being committed.
    #[error("Transaction {0} was rolled back")]
    RolledBack(u64),
    /// The transaction cannot be joined or used anymore.
    #[error("Transaction {0} is no longer active")]
    Inactive(u64),
    /// The transaction connection is held by an open cursor.
    #[error("The connection of transaction {0} is held by an open cursor")]
    Busy(u64),
    /// A batch read back a different number of generated keys than it submitted rows.
    #[error("Expected {expected} generated keys but the driver returned {actual}")]
    KeyCountMismatch { expected: usize, actual: usize },
    /// Optimistic updates kept losing the race past the retry budget.
    #[error("Gave up after {attempts} contended attempts on {target}")]
    Contention { target: String, attempts: usize },
}

impl ErrorKind {
    pub fn invalid_argument(message: impl Into<String>) -> Error {
        Error::new(ErrorKind::InvalidArgument(message.into()))
    }
}

/// Kind of the error, if it was raised by sluice.
pub fn error_kind(error: &Error) -> Option<&ErrorKind> {
    error.downcast_ref::<ErrorKind>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context() {
        let error: Result<(), Error> = Err(ErrorKind::invalid_argument("empty table name"));
        let error = error
            .context("While creating the sequence")
            .context("While starting")
            .unwrap_err();
        assert_eq!(
            error_kind(&error),
            Some(&ErrorKind::InvalidArgument("empty table name".into()))
        );
        assert!(error_kind(&Error::msg("plain")).is_none());
    }
}
