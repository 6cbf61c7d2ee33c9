//! A variant payload for heterogeneous flows.
//!
//! Flows are statically typed, so a sequence mixing integers, floats and
//! strings is modelled as `Flow<Value>`. The `of_type` and `cast` operators
//! then narrow it with an explicit discriminant check through [`FromValue`].

use std::fmt::{Display, Formatter};

/// A dynamically typed item.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Int(i64),
  Float(f64),
  Bool(bool),
  Text(String),
}

impl Value {
  /// Name of the variant, as reported by `FlowError::Cast`.
  pub fn kind(&self) -> &'static str {
    match self {
      Value::Int(_) => i64::KIND,
      Value::Float(_) => f64::KIND,
      Value::Bool(_) => bool::KIND,
      Value::Text(_) => String::KIND,
    }
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      Value::Int(v) => write!(f, "{v}"),
      Value::Float(v) => write!(f, "{v}"),
      Value::Bool(v) => write!(f, "{v}"),
      Value::Text(v) => f.write_str(v),
    }
  }
}

/// Extraction of a concrete type from a [`Value`].
pub trait FromValue: Sized {
  /// Variant name used in cast errors.
  const KIND: &'static str;

  /// Returns the payload, or gives the value back when the variant differs.
  fn from_value(value: Value) -> Result<Self, Value>;
}

macro_rules! impl_value_variant {
  ($ty:ty, $variant:ident, $kind:literal) => {
    impl FromValue for $ty {
      const KIND: &'static str = $kind;

      fn from_value(value: Value) -> Result<Self, Value> {
        match value {
          Value::$variant(v) => Ok(v),
          other => Err(other),
        }
      }
    }

    impl From<$ty> for Value {
      fn from(v: $ty) -> Self { Value::$variant(v) }
    }
  };
}

impl_value_variant!(i64, Int, "int");
impl_value_variant!(f64, Float, "float");
impl_value_variant!(bool, Bool, "bool");
impl_value_variant!(String, Text, "text");

impl From<&str> for Value {
  fn from(v: &str) -> Self { Value::Text(v.to_owned()) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Value::Int(v.into()) }
}
