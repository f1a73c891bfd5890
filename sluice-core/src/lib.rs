mod as_value;
mod batch;
mod broker;
mod config;
mod connection;
mod cursor;
mod driver;
mod error;
mod executor;
mod extract;
mod isolation;
mod params;
mod pool;
mod prepared;
mod query;
mod row_lock;
mod sequence;
mod sql;
mod sql_executor;
mod sql_writer;
mod transaction;
mod util;
mod value;

pub use ::anyhow::Context;
pub use as_value::*;
pub use batch::*;
pub use broker::*;
pub use config::*;
pub use connection::*;
pub use cursor::*;
pub use driver::*;
pub use error::*;
pub use executor::*;
pub use extract::*;
pub use isolation::*;
pub use params::*;
pub use pool::*;
pub use prepared::*;
pub use query::*;
pub use row_lock::*;
pub use sequence::*;
pub use sql::*;
pub use sql_executor::*;
pub use sql_writer::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
