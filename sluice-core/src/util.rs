use std::sync::{Mutex, MutexGuard, PoisonError};
use time::{OffsetDateTime, PrimitiveDateTime};

pub fn consume_while<'s>(input: &mut &'s str, predicate: impl FnMut(&char) -> bool) -> &'s str {
    let len = input
        .chars()
        .take_while(predicate)
        .map(char::len_utf8)
        .sum::<usize>();
    if len == 0 {
        return "";
    }
    let result = &input[..len];
    *input = &input[len..];
    result
}

/// Current UTC time without offset, the representation used for bookkeeping columns.
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Locks a mutex whose data stays consistent even if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[macro_export]
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            &$query[..::std::cmp::min($query.len(), 497)].trim_end(),
            if $query.len() > 497 { "..." } else { "" },
        )
    };
}

/// Builds the error context attached to driver failures, carrying the offending SQL.
#[macro_export]
macro_rules! sql_context {
    ($action:literal, $sql:expr) => {
        format!(concat!("While ", $action, " the query:\n{}"), $crate::truncate_long!($sql))
    };
}

#[cfg(test)]
mod tests {
    use super::consume_while;

    #[test]
    fn consume_identifier() {
        let mut input = "order_id, rest";
        let ident = consume_while(&mut input, |c| c.is_alphanumeric() || *c == '_');
        assert_eq!(ident, "order_id");
        assert_eq!(input, ", rest");
        assert_eq!(consume_while(&mut input, |c| c.is_alphabetic()), "");
        assert_eq!(input, ", rest");
    }

    #[test]
    fn truncate() {
        let long = "x".repeat(600);
        let text = format!("{}", truncate_long!(long));
        assert_eq!(text.len(), 500);
        assert!(text.ends_with("..."));
        assert_eq!(format!("{}", truncate_long!("SELECT 1")), "SELECT 1");
    }
}
