use crate::IsolationLevel;
use std::fmt::Write;

/// Dialect specific SQL text used by the core.
///
/// Every method has a standard SQL default; drivers override what their backend spells
/// differently. Table names are always passed through [`SqlWriter::write_identifier_quoted`].
pub trait SqlWriter: Send + Sync {
    fn write_escaped(&self, out: &mut String, value: &str, search: char, replace: &str) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == search {
                out.push_str(&value[position..i]);
                out.push_str(replace);
                position = i + c.len_utf8();
            }
        }
        out.push_str(&value[position..]);
    }

    fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push('"');
        self.write_escaped(out, value, '"', r#""""#);
        out.push('"');
    }

    /// Placeholder for the parameter at `index` (from 0).
    fn write_placeholder(&self, out: &mut String, _index: usize) {
        out.push('?');
    }

    fn write_transaction_begin(&self, out: &mut String) {
        out.push_str("BEGIN");
    }

    fn write_transaction_commit(&self, out: &mut String) {
        out.push_str("COMMIT");
    }

    fn write_transaction_rollback(&self, out: &mut String) {
        out.push_str("ROLLBACK");
    }

    fn write_isolation_level(&self, out: &mut String, level: IsolationLevel) {
        let _ = write!(out, "SET TRANSACTION ISOLATION LEVEL {}", level);
    }

    fn write_timestamp_type(&self, out: &mut String) {
        out.push_str("TIMESTAMP");
    }

    fn write_create_sequence_table(&self, out: &mut String, table: &str) {
        out.push_str("CREATE TABLE IF NOT EXISTS ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (seq_name VARCHAR(64), next_val BIGINT, update_time ");
        self.write_timestamp_type(out);
        out.push_str(" NOT NULL, create_time ");
        self.write_timestamp_type(out);
        out.push_str(" NOT NULL, UNIQUE (seq_name))");
    }

    /// Parameters: `seq_name`.
    fn write_select_sequence(&self, out: &mut String, table: &str) {
        out.push_str("SELECT next_val FROM ");
        self.write_identifier_quoted(out, table);
        out.push_str(" WHERE seq_name = ");
        self.write_placeholder(out, 0);
    }

    /// Parameters: `seq_name`, `next_val`, `update_time`, `create_time`. Concurrent inserts of
    /// the same name fail on the unique constraint unless the dialect ignores the conflict.
    fn write_insert_sequence(&self, out: &mut String, table: &str) {
        out.push_str("INSERT INTO ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (seq_name, next_val, update_time, create_time) VALUES (");
        self.write_placeholder(out, 0);
        out.push_str(", ");
        self.write_placeholder(out, 1);
        out.push_str(", ");
        self.write_placeholder(out, 2);
        out.push_str(", ");
        self.write_placeholder(out, 3);
        out.push(')');
    }

    /// Conditional update. Parameters: new `next_val`, `update_time`, expected `next_val`,
    /// `seq_name`.
    fn write_advance_sequence(&self, out: &mut String, table: &str) {
        out.push_str("UPDATE ");
        self.write_identifier_quoted(out, table);
        out.push_str(" SET next_val = ");
        self.write_placeholder(out, 0);
        out.push_str(", update_time = ");
        self.write_placeholder(out, 1);
        out.push_str(" WHERE next_val = ");
        self.write_placeholder(out, 2);
        out.push_str(" AND seq_name = ");
        self.write_placeholder(out, 3);
    }

    /// Moves the sequence forward, never backward. Parameters: `next_val`, `update_time`,
    /// `seq_name`, `next_val` again.
    fn write_reset_sequence(&self, out: &mut String, table: &str) {
        out.push_str("UPDATE ");
        self.write_identifier_quoted(out, table);
        out.push_str(" SET next_val = ");
        self.write_placeholder(out, 0);
        out.push_str(", update_time = ");
        self.write_placeholder(out, 1);
        out.push_str(" WHERE seq_name = ");
        self.write_placeholder(out, 2);
        out.push_str(" AND next_val < ");
        self.write_placeholder(out, 3);
    }

    fn write_create_lock_table(&self, out: &mut String, table: &str) {
        out.push_str("CREATE TABLE IF NOT EXISTS ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (lock_name VARCHAR(64) NOT NULL, holder VARCHAR(64) NOT NULL, update_time ");
        self.write_timestamp_type(out);
        out.push_str(" NOT NULL, create_time ");
        self.write_timestamp_type(out);
        out.push_str(" NOT NULL, UNIQUE (lock_name))");
    }

    /// Parameters: `lock_name`, `holder`, `update_time`, `create_time`.
    fn write_insert_lock(&self, out: &mut String, table: &str) {
        out.push_str("INSERT INTO ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (lock_name, holder, update_time, create_time) VALUES (");
        self.write_placeholder(out, 0);
        out.push_str(", ");
        self.write_placeholder(out, 1);
        out.push_str(", ");
        self.write_placeholder(out, 2);
        out.push_str(", ");
        self.write_placeholder(out, 3);
        out.push(')');
    }

    /// Parameters: `lock_name`.
    fn write_select_lock(&self, out: &mut String, table: &str) {
        out.push_str("SELECT holder FROM ");
        self.write_identifier_quoted(out, table);
        out.push_str(" WHERE lock_name = ");
        self.write_placeholder(out, 0);
    }

    /// Takes the lock if free or abandoned. Parameters: new `holder`, `update_time`, `lock_name`,
    /// unlocked sentinel, abandoned threshold.
    fn write_acquire_lock(&self, out: &mut String, table: &str) {
        out.push_str("UPDATE ");
        self.write_identifier_quoted(out, table);
        out.push_str(" SET holder = ");
        self.write_placeholder(out, 0);
        out.push_str(", update_time = ");
        self.write_placeholder(out, 1);
        out.push_str(" WHERE lock_name = ");
        self.write_placeholder(out, 2);
        out.push_str(" AND (holder = ");
        self.write_placeholder(out, 3);
        out.push_str(" OR update_time < ");
        self.write_placeholder(out, 4);
        out.push(')');
    }

    /// Changes the holder only if it matches. Parameters: new `holder`, `update_time`,
    /// `lock_name`, expected `holder`.
    fn write_swap_lock(&self, out: &mut String, table: &str) {
        out.push_str("UPDATE ");
        self.write_identifier_quoted(out, table);
        out.push_str(" SET holder = ");
        self.write_placeholder(out, 0);
        out.push_str(", update_time = ");
        self.write_placeholder(out, 1);
        out.push_str(" WHERE lock_name = ");
        self.write_placeholder(out, 2);
        out.push_str(" AND holder = ");
        self.write_placeholder(out, 3);
    }
}

/// Standard SQL, no overrides.
#[derive(Default, Debug, Clone, Copy)]
pub struct GenericSqlWriter;

impl SqlWriter for GenericSqlWriter {}

#[cfg(test)]
mod tests {
    use super::{GenericSqlWriter, SqlWriter};

    #[test]
    fn quoted_identifiers() {
        let mut out = String::new();
        GenericSqlWriter.write_identifier_quoted(&mut out, r#"odd"name"#);
        assert_eq!(out, r#""odd""name""#);
    }

    #[test]
    fn advance_sequence() {
        let mut out = String::new();
        GenericSqlWriter.write_advance_sequence(&mut out, "seq_tbl");
        assert_eq!(
            out,
            r#"UPDATE "seq_tbl" SET next_val = ?, update_time = ? WHERE next_val = ? AND seq_name = ?"#
        );
    }
}
