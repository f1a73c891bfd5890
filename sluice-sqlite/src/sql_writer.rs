use sluice_core::{IsolationLevel, SqlWriter};
use std::fmt::Write;

#[derive(Default, Debug, Clone, Copy)]
pub struct SqliteSqlWriter {}

impl SqlWriter for SqliteSqlWriter {
    /// Sqlite transactions are serializable, only dirty reads between connections sharing a
    /// cache can be enabled.
    fn write_isolation_level(&self, out: &mut String, level: IsolationLevel) {
        let _ = write!(
            out,
            "PRAGMA read_uncommitted = {}",
            (level == IsolationLevel::ReadUncommitted) as u8
        );
    }

    fn write_timestamp_type(&self, out: &mut String) {
        out.push_str("TEXT");
    }

    fn write_insert_sequence(&self, out: &mut String, table: &str) {
        out.push_str("INSERT OR IGNORE INTO ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (seq_name, next_val, update_time, create_time) VALUES (?, ?, ?, ?)");
    }

    fn write_insert_lock(&self, out: &mut String, table: &str) {
        out.push_str("INSERT OR IGNORE INTO ");
        self.write_identifier_quoted(out, table);
        out.push_str(" (lock_name, holder, update_time, create_time) VALUES (?, ?, ?, ?)");
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteSqlWriter;
    use sluice_core::{IsolationLevel, SqlWriter};

    #[test]
    fn dialect() {
        let writer = SqliteSqlWriter {};
        let mut out = String::new();
        writer.write_isolation_level(&mut out, IsolationLevel::ReadUncommitted);
        assert_eq!(out, "PRAGMA read_uncommitted = 1");
        out.clear();
        writer.write_isolation_level(&mut out, IsolationLevel::Serializable);
        assert_eq!(out, "PRAGMA read_uncommitted = 0");
        out.clear();
        writer.write_create_sequence_table(&mut out, "seq_tbl");
        assert_eq!(
            out,
            r#"CREATE TABLE IF NOT EXISTS "seq_tbl" (seq_name VARCHAR(64), next_val BIGINT, update_time TEXT NOT NULL, create_time TEXT NOT NULL, UNIQUE (seq_name))"#
        );
        out.clear();
        writer.write_insert_lock(&mut out, "locks");
        assert_eq!(
            out,
            r#"INSERT OR IGNORE INTO "locks" (lock_name, holder, update_time, create_time) VALUES (?, ?, ?, ?)"#
        );
    }
}
