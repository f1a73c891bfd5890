use std::fmt::{self, Display};

/// Transaction isolation levels.
///
/// `Default` means "whatever the executor is configured with", and if that is `Default` as well,
/// whatever the connection already uses. Drivers never receive `Default` as a request to change
/// anything.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Replaces `Default` with `fallback`.
    pub fn or(self, fallback: IsolationLevel) -> IsolationLevel {
        match self {
            IsolationLevel::Default => fallback,
            v => v,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, IsolationLevel::Default)
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Default => "DEFAULT",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::IsolationLevel;

    #[test]
    fn resolve_default() {
        assert_eq!(
            IsolationLevel::Default.or(IsolationLevel::ReadCommitted),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            IsolationLevel::Serializable.or(IsolationLevel::ReadCommitted),
            IsolationLevel::Serializable
        );
        assert_eq!(IsolationLevel::RepeatableRead.to_string(), "REPEATABLE READ");
    }
}
