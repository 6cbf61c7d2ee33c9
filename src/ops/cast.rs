//! `of_type` and `cast` over flows of [`Value`].
//!
//! Payloads of mixed kinds travel as the [`Value`] sum type; these two
//! operators narrow such a flow to one concrete type by checking the
//! variant, either dropping (`of_type`) or failing on (`cast`) the others.

use crate::{
  error::FlowError,
  publisher::Flow,
  value::{FromValue, Value},
};

impl Flow<Value> {
  /// Keeps the values of kind `T` and drops the rest.
  ///
  /// ```rust
  /// use rxflow::prelude::*;
  ///
  /// let ts = TestSubscriber::unbounded();
  /// Flow::just([Value::from(1), Value::from("two"), Value::from(3)])
  ///   .of_type::<i64>()
  ///   .subscribe_with(ts.clone());
  /// ts.assert_completed_with(&[1, 3]);
  /// ```
  pub fn of_type<T>(&self) -> Flow<T>
  where
    T: FromValue + Send + 'static,
  {
    self.filter_map(|v| T::from_value(v).ok())
  }

  /// Converts every value to `T`; the first value of another kind fails the
  /// flow with [`FlowError::Cast`].
  pub fn cast<T>(&self) -> Flow<T>
  where
    T: FromValue + Send + 'static,
  {
    self.try_map(|v| {
      T::from_value(v).map_err(|other| FlowError::Cast { expected: T::KIND, found: other.kind() })
    })
  }
}
