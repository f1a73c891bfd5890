use rust_decimal::Decimal;
use std::fmt::{self, Display};
use time::{PrimitiveDateTime, macros::format_description};
use uuid::Uuid;

/// Dynamically typed value moved between Rust and the driver: query parameters on the way in,
/// column values on the way out.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    Varchar(String),
    Blob(Box<[u8]>),
    Timestamp(PrimitiveDateTime),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, used in conversion error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(..) => "Boolean",
            Value::Int64(..) => "Int64",
            Value::Float64(..) => "Float64",
            Value::Decimal(..) => "Decimal",
            Value::Varchar(..) => "Varchar",
            Value::Blob(..) => "Blob",
            Value::Timestamp(..) => "Timestamp",
            Value::Uuid(..) => "Uuid",
        }
    }
}

/// Text layout used for timestamps stored in character columns. Fixed width, so that the textual
/// order matches the chronological one.
pub const TIMESTAMP_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
);

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Varchar(v) => write!(f, "'{}'", v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Value::Timestamp(v) => match v.format(TIMESTAMP_FORMAT) {
                Ok(v) => write!(f, "'{}'", v),
                Err(..) => write!(f, "'{}'", v),
            },
            Value::Uuid(v) => write!(f, "'{}'", v),
        }
    }
}
