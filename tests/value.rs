#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use sluice::{AsValue, FromRow, FromValue, RowLabeled, Value};
    use std::str::FromStr;
    use time::macros::datetime;
    use uuid::Uuid;

    fn row(values: Vec<Value>) -> RowLabeled {
        let labels = (0..values.len()).map(|i| format!("c{}", i)).collect();
        RowLabeled::new(labels, values.into())
    }

    #[test]
    fn value_bool() {
        assert_eq!(true.as_value(), Value::Boolean(true));
        assert!(bool::try_from_value(Value::Int64(3)).unwrap());
        assert!(!bool::try_from_value(Value::Int64(0)).unwrap());
        assert!(bool::try_from_value(Value::Varchar("true".into())).is_err());
    }

    #[test]
    fn value_decimal() {
        let value = Decimal::from_str("123.4500").unwrap();
        assert_eq!(value.as_value(), Value::Decimal(value));
        assert_eq!(
            Decimal::try_from_value(Value::Varchar("123.4500".into())).unwrap(),
            value
        );
        assert_eq!(
            Decimal::try_from_value(Value::Int64(7)).unwrap(),
            Decimal::from(7)
        );
        assert!(Decimal::try_from_value(Value::Varchar("twelve".into())).is_err());
        assert_eq!(
            f64::try_from_value(Value::Decimal(Decimal::new(25, 1))).unwrap(),
            2.5
        );
    }

    #[test]
    fn value_text_forms() {
        let uuid = Uuid::from_str("6f1b9d0e-3c2a-4a7e-9b1d-2f3c4d5e6f70").unwrap();
        assert_eq!(
            Uuid::try_from_value(Value::Varchar(uuid.to_string())).unwrap(),
            uuid
        );
        assert_eq!(
            Uuid::try_from_value(Value::Blob(uuid.as_bytes().to_vec().into())).unwrap(),
            uuid
        );
        assert_eq!(
            time::PrimitiveDateTime::try_from_value(Value::Varchar("2025-01-02T03:04:05".into()))
                .unwrap(),
            datetime!(2025-01-02 03:04:05)
        );
        assert_eq!(
            String::try_from_value(Value::Int64(42)).unwrap(),
            "42".to_string()
        );
        assert!(String::try_from_value(Value::Blob(vec![1, 2].into())).is_err());
    }

    #[test]
    fn value_integers() {
        assert_eq!(u64::MAX.as_value(), Value::Decimal(Decimal::from(u64::MAX)));
        assert_eq!(
            u64::try_from_value(Value::Decimal(Decimal::from(u64::MAX))).unwrap(),
            u64::MAX
        );
        assert!(u64::try_from_value(Value::Int64(-1)).is_err());
        assert!(u8::try_from_value(Value::Int64(256)).is_err());
        assert_eq!(i16::try_from_value(Value::Boolean(true)).unwrap(), 1);
    }

    #[test]
    fn value_options() {
        assert_eq!(None::<Decimal>.as_value(), Value::Null);
        assert_eq!(Some(5i32).as_value(), Value::Int64(5));
        assert_eq!(Option::<Uuid>::try_from_value(Value::Null).unwrap(), None);
    }

    #[test]
    fn rows() {
        let labeled = row(vec![
            Value::Int64(1),
            Value::Varchar("a".into()),
            Value::Null,
        ]);
        assert_eq!(i64::from_row(labeled.clone()).unwrap(), 1);
        assert_eq!(
            <(i64, String, Option<f64>)>::from_row(labeled.clone()).unwrap(),
            (1, "a".to_string(), None)
        );
        assert!(<(i64, i64)>::from_row(labeled.clone()).is_err());
        assert!(<(i64, String, f64, bool)>::from_row(labeled.clone()).is_err());
        assert_eq!(RowLabeled::from_row(labeled.clone()).unwrap(), labeled);
    }
}
