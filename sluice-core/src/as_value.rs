use crate::{Error, Result, TIMESTAMP_FORMAT, Value, truncate_long};
use anyhow::Context;
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};
use std::{any, str::FromStr};
use time::{PrimitiveDateTime, macros::format_description};
use uuid::Uuid;

/// Conversion of a native Rust value into a [`Value`] usable as a query parameter.
///
/// ```rust
/// use sluice_core::{AsValue, Value};
/// assert_eq!(42i32.as_value(), Value::Int64(42));
/// assert_eq!(None::<i64>.as_value(), Value::Null);
/// ```
pub trait AsValue {
    fn as_value(self) -> Value;
}

/// Conversion of a column [`Value`] back into a native Rust type.
///
/// Drivers without a native type for a value (SQLite stores timestamps, decimals and uuids as
/// text) hand back the textual form, so implementations accept `Varchar` and parse it.
pub trait FromValue: Sized {
    fn try_from_value(value: Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::msg(format!(
        "Cannot convert a {} value `{}` into {}",
        value.kind(),
        truncate_long!(value.to_string()),
        any::type_name::<T>()
    ))
}

impl AsValue for Value {
    fn as_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn try_from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::try_from_value(value).map(Some)
    }
}

impl AsValue for bool {
    fn as_value(self) -> Value {
        Value::Boolean(self)
    }
}

impl FromValue for bool {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(v) => Ok(v),
            Value::Int64(v) => Ok(v != 0),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

macro_rules! impl_integer {
    ($($t:ty),+ $(,)?) => {
        $(
            impl AsValue for $t {
                fn as_value(self) -> Value {
                    Value::Int64(self as i64)
                }
            }
            impl FromValue for $t {
                fn try_from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::Int64(v) => <$t>::try_from(v).with_context(|| {
                            format!("Value {} is out of range for {}", v, any::type_name::<$t>())
                        }),
                        Value::Boolean(v) => Ok(v as $t),
                        Value::Varchar(ref v) => v
                            .trim()
                            .parse::<$t>()
                            .with_context(|| format!("Cannot parse `{}` as {}", v, any::type_name::<$t>())),
                        _ => Err(mismatch::<Self>(&value)),
                    }
                }
            }
        )+
    };
}

impl_integer!(i8, i16, i32, i64, u8, u16, u32);

impl AsValue for u64 {
    fn as_value(self) -> Value {
        match i64::try_from(self) {
            Ok(v) => Value::Int64(v),
            Err(..) => Value::Decimal(Decimal::from(self)),
        }
    }
}

impl FromValue for u64 {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Int64(v) => u64::try_from(v).with_context(|| format!("Value {} is negative", v)),
            Value::Decimal(v) => v
                .to_u64()
                .ok_or_else(|| Error::msg(format!("Value {} is out of range for u64", v))),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for f64 {
    fn as_value(self) -> Value {
        Value::Float64(self)
    }
}

impl AsValue for f32 {
    fn as_value(self) -> Value {
        Value::Float64(self as f64)
    }
}

impl FromValue for f64 {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float64(v) => Ok(v),
            Value::Int64(v) => Ok(v as f64),
            Value::Decimal(v) => v
                .to_f64()
                .ok_or_else(|| Error::msg(format!("Cannot represent {} as f64", v))),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Decimal {
    fn as_value(self) -> Value {
        Value::Decimal(self)
    }
}

impl FromValue for Decimal {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::Int64(v) => Ok(Decimal::from(v)),
            Value::Float64(v) => Decimal::from_f64(v)
                .ok_or_else(|| Error::msg(format!("Cannot represent {} as Decimal", v))),
            Value::Varchar(ref v) => Decimal::from_str(v.trim())
                .with_context(|| format!("Cannot parse `{}` as Decimal", v)),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for String {
    fn as_value(self) -> Value {
        Value::Varchar(self)
    }
}

impl AsValue for &str {
    fn as_value(self) -> Value {
        Value::Varchar(self.to_owned())
    }
}

impl AsValue for &String {
    fn as_value(self) -> Value {
        Value::Varchar(self.clone())
    }
}

impl FromValue for String {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(v) => Ok(v),
            Value::Null | Value::Blob(..) => Err(mismatch::<Self>(&value)),
            Value::Timestamp(v) => v
                .format(TIMESTAMP_FORMAT)
                .context("Cannot format the timestamp"),
            Value::Uuid(v) => Ok(v.to_string()),
            v => Ok(v.to_string()),
        }
    }
}

impl AsValue for Vec<u8> {
    fn as_value(self) -> Value {
        Value::Blob(self.into_boxed_slice())
    }
}

impl AsValue for &[u8] {
    fn as_value(self) -> Value {
        Value::Blob(self.into())
    }
}

impl FromValue for Vec<u8> {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(v) => Ok(v.into_vec()),
            Value::Varchar(v) => Ok(v.into_bytes()),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for PrimitiveDateTime {
    fn as_value(self) -> Value {
        Value::Timestamp(self)
    }
}

impl FromValue for PrimitiveDateTime {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Varchar(ref v) => PrimitiveDateTime::parse(v, TIMESTAMP_FORMAT)
                .or(PrimitiveDateTime::parse(
                    v,
                    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
                ))
                .or(PrimitiveDateTime::parse(
                    v,
                    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
                ))
                .with_context(|| format!("Cannot parse `{}` as time::PrimitiveDateTime", v)),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Uuid {
    fn as_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl FromValue for Uuid {
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(v) => Ok(v),
            Value::Varchar(ref v) => {
                Uuid::parse_str(v).with_context(|| format!("Cannot parse `{}` as Uuid", v))
            }
            Value::Blob(ref v) => {
                Uuid::from_slice(v).with_context(|| "Cannot build a Uuid from the blob value")
            }
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn integers() {
        assert_eq!(7u8.as_value(), Value::Int64(7));
        assert_eq!(i32::try_from_value(Value::Int64(-5)).unwrap(), -5);
        assert!(i8::try_from_value(Value::Int64(300)).is_err());
        assert_eq!(u32::try_from_value(Value::Varchar(" 12 ".into())).unwrap(), 12);
        assert_eq!(u64::MAX.as_value(), Value::Decimal(Decimal::from(u64::MAX)));
    }

    #[test]
    fn options() {
        assert_eq!(Option::<i64>::try_from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Option::<String>::try_from_value(Value::Varchar("x".into())).unwrap(),
            Some("x".to_string())
        );
        assert!(String::try_from_value(Value::Null).is_err());
    }

    #[test]
    fn timestamps_from_text() {
        let expected = datetime!(2024-03-01 10:20:30.000125);
        let value = Value::Varchar("2024-03-01 10:20:30.000125".into());
        assert_eq!(PrimitiveDateTime::try_from_value(value).unwrap(), expected);
        let value = Value::Varchar("2024-03-01 10:20:30".into());
        assert_eq!(
            PrimitiveDateTime::try_from_value(value).unwrap(),
            datetime!(2024-03-01 10:20:30)
        );
        assert_eq!(
            String::try_from_value(expected.as_value()).unwrap(),
            "2024-03-01 10:20:30.000125"
        );
    }
}
