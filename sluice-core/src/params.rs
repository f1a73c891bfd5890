use crate::{AsValue, Value};

/// Values for the placeholders of one statement execution.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(v) => v.len(),
            Params::Named(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(value: Vec<Value>) -> Self {
        Params::Positional(value)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(value: [Value; N]) -> Self {
        Params::Positional(value.into())
    }
}

impl From<Vec<(String, Value)>> for Params {
    fn from(value: Vec<(String, Value)>) -> Self {
        Params::Named(value)
    }
}

impl<T: AsValue> From<(T,)> for Params {
    fn from(value: (T,)) -> Self {
        Params::Positional(vec![value.0.as_value()])
    }
}

/// Positional parameters.
///
/// ```rust
/// use sluice_core::{Params, Value, params};
/// assert_eq!(
///     params![1, "a"],
///     Params::Positional(vec![Value::Int64(1), Value::Varchar("a".into())])
/// );
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Params::Positional(vec![$($crate::AsValue::as_value($value)),+])
    };
}

/// Named parameters, matched against `:name` / `#{name}` placeholders.
#[macro_export]
macro_rules! named_params {
    ($($name:expr => $value:expr),* $(,)?) => {
        $crate::Params::Named(vec![$(($name.to_string(), $crate::AsValue::as_value($value))),*])
    };
}
