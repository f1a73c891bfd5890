use crate::{Connection, Prepared, SqlWriter};

pub trait Driver: Default + Send + Sync + 'static {
    type Connection: Connection;
    type SqlWriter: SqlWriter;
    type Prepared: Prepared;

    const NAME: &'static str;

    fn sql_writer(&self) -> Self::SqlWriter;
}
