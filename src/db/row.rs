//! Owned result rows.

use std::sync::Arc;

use rusqlite::types::Value;
use serde::de::DeserializeOwned;

use crate::error::ScanError;

/// One materialized result row.
///
/// Column names are shared between all rows of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  columns: Arc<[String]>,
  values: Vec<Value>,
}

impl Row {
  /// Build a row. `values` must hold exactly one entry per column.
  pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
    debug_assert_eq!(columns.len(), values.len());
    Self { columns, values }
  }

  pub fn columns(&self) -> &[String] {
    &self.columns
  }

  pub fn values(&self) -> &[Value] {
    &self.values
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Value at a column position.
  pub fn get(&self, index: usize) -> Option<&Value> {
    self.values.get(index)
  }

  /// Value of the first column with the given name.
  pub fn get_by_name(&self, name: &str) -> Option<&Value> {
    self
      .columns
      .iter()
      .position(|column| column == name)
      .and_then(|index| self.values.get(index))
  }

  /// Decode the row into `T` (see [`crate::scan`] for the mapping rules).
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ScanError> {
    crate::scan::from_row(self)
  }
}
