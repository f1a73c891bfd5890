use crate::{
    Driver, ErrorKind, Params, Query, Result, SqlWriter, Value, consume_while, util::lock,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// SQL text parsed once and ready for the driver.
///
/// Named placeholders (`:name` and `#{name}`) and positional ones (`?`) are rewritten into the
/// dialect placeholder. Literals, quoted identifiers, comments and `::` casts are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    original: String,
    sql: String,
    names: Vec<String>,
    count: usize,
}

impl ParsedSql {
    pub fn parse(sql: &str, writer: &dyn SqlWriter) -> Result<Self> {
        let mut out = String::with_capacity(sql.len());
        let mut names = Vec::new();
        let mut positional = 0;
        let mut input = sql;
        while let Some(c) = input.chars().next() {
            let next = input[c.len_utf8()..].chars().next();
            match (c, next) {
                ('\'' | '"' | '`', _) => {
                    out.push(c);
                    input = &input[1..];
                    let body = consume_while(&mut input, |v| *v != c);
                    out.push_str(body);
                    if !input.is_empty() {
                        out.push(c);
                        input = &input[1..];
                    }
                }
                ('-', Some('-')) => {
                    let comment = consume_while(&mut input, |v| *v != '\n');
                    out.push_str(comment);
                }
                ('/', Some('*')) => {
                    let end = input[2..].find("*/").map(|i| i + 4).unwrap_or(input.len());
                    out.push_str(&input[..end]);
                    input = &input[end..];
                }
                (':', Some(':')) => {
                    out.push_str("::");
                    input = &input[2..];
                }
                (':', Some(v)) if v.is_alphabetic() || v == '_' => {
                    input = &input[1..];
                    let name = consume_while(&mut input, |v| v.is_alphanumeric() || *v == '_');
                    writer.write_placeholder(&mut out, names.len() + positional);
                    names.push(name.to_string());
                }
                ('#', Some('{')) => {
                    let Some(end) = input.find('}') else {
                        return Err(ErrorKind::invalid_argument(format!(
                            "Unterminated named parameter in `{}`",
                            sql
                        )));
                    };
                    let name = input[2..end].trim();
                    if name.is_empty() {
                        return Err(ErrorKind::invalid_argument(format!(
                            "Empty named parameter in `{}`",
                            sql
                        )));
                    }
                    writer.write_placeholder(&mut out, names.len() + positional);
                    names.push(name.to_string());
                    input = &input[end + 1..];
                }
                ('?', _) => {
                    writer.write_placeholder(&mut out, names.len() + positional);
                    positional += 1;
                    input = &input[1..];
                }
                _ => {
                    out.push(c);
                    input = &input[c.len_utf8()..];
                }
            }
        }
        if positional > 0 && !names.is_empty() {
            return Err(ErrorKind::invalid_argument(format!(
                "Cannot mix named and positional parameters in `{}`",
                sql
            )));
        }
        Ok(Self {
            original: sql.to_string(),
            sql: out,
            count: positional + names.len(),
            names,
        })
    }

    /// The text as written by the caller.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The text handed to the driver.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Names of the named placeholders in order of appearance, empty for positional SQL.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn parameter_count(&self) -> usize {
        self.count
    }

    pub fn is_named(&self) -> bool {
        !self.names.is_empty()
    }

    /// Arrange `params` in placeholder order.
    pub fn resolve(&self, params: &Params) -> Result<Vec<Value>> {
        match params {
            Params::None if self.count == 0 => Ok(Vec::new()),
            Params::None => Err(ErrorKind::invalid_argument(format!(
                "The query expects {} parameters but none were given:\n{}",
                self.count, self.original
            ))),
            Params::Positional(values) => {
                if values.len() != self.count {
                    return Err(ErrorKind::invalid_argument(format!(
                        "The query expects {} parameters but {} were given:\n{}",
                        self.count,
                        values.len(),
                        self.original
                    )));
                }
                Ok(values.clone())
            }
            Params::Named(values) => self
                .names
                .iter()
                .map(|name| {
                    values
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            ErrorKind::invalid_argument(format!(
                                "Missing value for the named parameter `{}` of:\n{}",
                                name, self.original
                            ))
                        })
                })
                .collect(),
        }
    }

    /// Bind `params` onto a prepared query, replacing any previous binding.
    pub fn bind<D: Driver>(&self, query: &mut Query<D>, params: &Params) -> Result<()> {
        let values = self.resolve(params)?;
        query.bind_all(&values)?;
        Ok(())
    }
}

/// Parsed SQL cached by text. Entries are never invalidated, the cache is emptied when full.
#[derive(Debug)]
pub struct SqlCache {
    capacity: usize,
    entries: Mutex<HashMap<String, Arc<ParsedSql>>>,
}

impl SqlCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_parse(&self, sql: &str, writer: &dyn SqlWriter) -> Result<Arc<ParsedSql>> {
        if let Some(parsed) = lock(&self.entries).get(sql) {
            return Ok(parsed.clone());
        }
        let parsed = Arc::new(ParsedSql::parse(sql, writer)?);
        if self.capacity > 0 {
            let mut entries = lock(&self.entries);
            if entries.len() >= self.capacity {
                log::debug!("SQL cache full ({} entries), clearing it", entries.len());
                entries.clear();
            }
            entries.insert(sql.to_string(), parsed.clone());
        }
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GenericSqlWriter, error_kind, named_params, params};

    struct DollarWriter;
    impl SqlWriter for DollarWriter {
        fn write_placeholder(&self, out: &mut String, index: usize) {
            out.push('$');
            out.push_str(&(index + 1).to_string());
        }
    }

    #[test]
    fn named_placeholders() {
        let parsed = ParsedSql::parse(
            "SELECT * FROM t WHERE a = :first AND b = #{second} AND c = ':skip' AND d::TEXT = :first",
            &GenericSqlWriter,
        )
        .unwrap();
        assert_eq!(
            parsed.sql(),
            "SELECT * FROM t WHERE a = ? AND b = ? AND c = ':skip' AND d::TEXT = ?"
        );
        assert_eq!(parsed.names(), ["first", "second", "first"]);
        assert_eq!(parsed.parameter_count(), 3);
        let values = parsed
            .resolve(&named_params! { "second" => 2, "first" => "one" })
            .unwrap();
        assert_eq!(
            values,
            [
                Value::Varchar("one".into()),
                Value::Int64(2),
                Value::Varchar("one".into())
            ]
        );
    }

    #[test]
    fn comments_and_dialect() {
        let parsed = ParsedSql::parse(
            "-- what? \nSELECT /* ?? */ x FROM \"we?ird\" WHERE y = ? AND z = ?",
            &DollarWriter,
        )
        .unwrap();
        assert_eq!(
            parsed.sql(),
            "-- what? \nSELECT /* ?? */ x FROM \"we?ird\" WHERE y = $1 AND z = $2"
        );
        assert!(!parsed.is_named());
        assert_eq!(parsed.parameter_count(), 2);
    }

    #[test]
    fn arity_is_checked() {
        let parsed = ParsedSql::parse("UPDATE t SET a = ? WHERE b = ?", &GenericSqlWriter).unwrap();
        let error = parsed.resolve(&params![1]).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(ErrorKind::InvalidArgument(..))
        ));
        assert!(parsed.resolve(&Params::None).is_err());
        assert_eq!(parsed.resolve(&params![1, 2]).unwrap().len(), 2);

        let named = ParsedSql::parse("DELETE FROM t WHERE id = :id", &GenericSqlWriter).unwrap();
        assert!(named.resolve(&named_params! { "other" => 1 }).is_err());
    }

    #[test]
    fn mixed_placeholders_rejected() {
        let error = ParsedSql::parse("SELECT ? , :name", &GenericSqlWriter).unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(ErrorKind::InvalidArgument(..))
        ));
    }

    #[test]
    fn cache_reuses_parsed_sql() {
        let cache = SqlCache::new(2);
        let a = cache.get_or_parse("SELECT 1", &GenericSqlWriter).unwrap();
        let b = cache.get_or_parse("SELECT 1", &GenericSqlWriter).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_parse("SELECT 2", &GenericSqlWriter).unwrap();
        assert_eq!(cache.len(), 2);
        cache.get_or_parse("SELECT 3", &GenericSqlWriter).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
