#[cfg(test)]
mod tests {
    use indoc::indoc;
    use sluice::{
        ErrorKind, GenericSqlWriter, ParsedSql, SqlCache, SqlWriter, Value, error_kind,
        named_params, params,
    };
    use sluice_sqlite::SqliteSqlWriter;
    use std::sync::Arc;

    const WRITER: SqliteSqlWriter = SqliteSqlWriter {};

    #[test]
    fn multiline_named() {
        let parsed = ParsedSql::parse(
            indoc! {"
                -- totals by :customer, not a parameter
                SELECT o.id, o.total::TEXT
                FROM \"order\" o
                /* :ignored */
                WHERE o.customer = :customer
                  AND o.created > #{ since }
                  AND o.note <> 'a :literal'
            "},
            &WRITER,
        )
        .unwrap();
        assert_eq!(
            parsed.sql(),
            indoc! {"
                -- totals by :customer, not a parameter
                SELECT o.id, o.total::TEXT
                FROM \"order\" o
                /* :ignored */
                WHERE o.customer = ?
                  AND o.created > ?
                  AND o.note <> 'a :literal'
            "}
        );
        assert_eq!(parsed.names(), ["customer", "since"]);
        assert!(parsed.is_named());
        let values = parsed
            .resolve(&named_params! { "since" => 10, "customer" => "acme", "unused" => true })
            .unwrap();
        assert_eq!(values, [Value::Varchar("acme".into()), Value::Int64(10)]);
    }

    #[test]
    fn positional() {
        let parsed = ParsedSql::parse("UPDATE t SET a = ?, b = ? WHERE id = ?", &WRITER).unwrap();
        assert_eq!(parsed.parameter_count(), 3);
        assert!(!parsed.is_named());
        assert_eq!(parsed.resolve(&params![1, 2, 3]).unwrap().len(), 3);
        let error = parsed.resolve(&params![1, 2]).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(ErrorKind::InvalidArgument(..))
        ));
        assert!(parsed.resolve(&().into()).is_err());
    }

    #[test]
    fn malformed() {
        for sql in [
            "SELECT * FROM t WHERE a = ? AND b = :b",
            "SELECT * FROM t WHERE a = #{a",
            "SELECT * FROM t WHERE a = #{ }",
        ] {
            let error = ParsedSql::parse(sql, &WRITER).unwrap_err();
            assert!(
                matches!(error_kind(&error), Some(ErrorKind::InvalidArgument(..))),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn cache() {
        let cache = SqlCache::new(2);
        let a = cache.get_or_parse("SELECT ?", &WRITER).unwrap();
        let b = cache.get_or_parse("SELECT ?", &WRITER).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_parse("SELECT 1", &WRITER).unwrap();
        assert_eq!(cache.len(), 2);
        cache.get_or_parse("SELECT 2", &WRITER).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get_or_parse("SELECT #{", &WRITER).is_err());
        assert_eq!(cache.len(), 1);

        let disabled = SqlCache::new(0);
        disabled.get_or_parse("SELECT ?", &WRITER).unwrap();
        assert!(disabled.is_empty());
    }

    #[test]
    fn sequence_statements() {
        let mut out = String::new();
        GenericSqlWriter.write_create_sequence_table(&mut out, "seq_tbl");
        assert_eq!(
            out,
            indoc! {r#"
                CREATE TABLE IF NOT EXISTS "seq_tbl" (seq_name VARCHAR(64), next_val BIGINT, update_time TIMESTAMP NOT NULL, create_time TIMESTAMP NOT NULL, UNIQUE (seq_name))
            "#}
            .trim()
        );
        out.clear();
        GenericSqlWriter.write_advance_sequence(&mut out, "seq_tbl");
        assert_eq!(
            out,
            r#"UPDATE "seq_tbl" SET next_val = ?, update_time = ? WHERE next_val = ? AND seq_name = ?"#
        );
        out.clear();
        WRITER.write_insert_sequence(&mut out, "seq_tbl");
        assert_eq!(
            out,
            r#"INSERT OR IGNORE INTO "seq_tbl" (seq_name, next_val, update_time, create_time) VALUES (?, ?, ?, ?)"#
        );
    }

    #[test]
    fn lock_statements() {
        let mut out = String::new();
        WRITER.write_create_lock_table(&mut out, "lock_tbl");
        assert_eq!(
            out,
            r#"CREATE TABLE IF NOT EXISTS "lock_tbl" (lock_name VARCHAR(64) NOT NULL, holder VARCHAR(64) NOT NULL, update_time TEXT NOT NULL, create_time TEXT NOT NULL, UNIQUE (lock_name))"#
        );
        out.clear();
        WRITER.write_acquire_lock(&mut out, "lock_tbl");
        assert_eq!(
            out,
            r#"UPDATE "lock_tbl" SET holder = ?, update_time = ? WHERE lock_name = ? AND (holder = ? OR update_time < ?)"#
        );
        out.clear();
        WRITER.write_swap_lock(&mut out, "lock_tbl");
        assert_eq!(
            out,
            r#"UPDATE "lock_tbl" SET holder = ?, update_time = ? WHERE lock_name = ? AND holder = ?"#
        );
    }

    #[test]
    fn transaction_statements() {
        let mut out = String::new();
        GenericSqlWriter.write_transaction_begin(&mut out);
        out.push_str("; ");
        GenericSqlWriter.write_transaction_rollback(&mut out);
        assert_eq!(out, "BEGIN; ROLLBACK");
        out.clear();
        GenericSqlWriter.write_isolation_level(&mut out, sluice::IsolationLevel::RepeatableRead);
        assert_eq!(out, "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ");
    }
}
