use crate::{AsValue, Result};
use std::fmt::Display;

/// A parameterized, backend-prepared statement handle.
///
/// Values are converted via the [`AsValue`] trait. The handle is released (finalized) when
/// dropped, so a prepared statement never outlives the operation that created it.
///
/// # Binding Semantics
/// * `bind` appends a value (driver chooses actual placeholder numbering).
/// * `bind_index` sets the parameter at `index` (from 0).
/// * `clear_bindings` resets the statement so that it can be executed again with new values.
///
/// Methods return `&mut Self` for fluent chaining:
/// ```rust,ignore
/// prepared.bind(42)?.bind("hello")?;
/// ```
pub trait Prepared: Send + Sync + Display {
    /// Append a parameter value.
    fn bind<V: AsValue>(&mut self, value: V) -> Result<&mut Self>;
    /// Bind a value at a specific index.
    fn bind_index<V: AsValue>(&mut self, value: V, index: u64) -> Result<&mut Self>;
    /// Remove all the previously bound values.
    fn clear_bindings(&mut self) -> Result<&mut Self>;
}
