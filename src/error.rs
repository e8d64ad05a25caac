//! Error types shared by the query helpers and the cache.

use std::fmt;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while running queries or filling caches.
#[derive(Debug, Error)]
pub enum Error {
  /// The executor rejected or failed to run the query (syntax, connectivity,
  /// argument binding).
  #[error("query failed: {0}")]
  Query(#[from] rusqlite::Error),

  /// A single-result query matched zero rows.
  #[error("no rows in result set")]
  NoRows,

  /// A row could not be mapped onto the target type.
  #[error(transparent)]
  Scan(#[from] ScanError),

  /// Binding a query template to its arguments failed.
  #[error("prepare SQL: {0}")]
  StatementPrep(String),

  /// Error raised by a cache factory, passed through unchanged.
  #[error(transparent)]
  Factory(Box<dyn std::error::Error + Send + Sync>),

  /// The context was cancelled.
  #[error("operation cancelled")]
  Cancelled,

  /// The context deadline passed.
  #[error("deadline exceeded")]
  DeadlineExceeded,

  /// The cursor or its connection slot is no longer usable.
  #[error("cursor failed: {0}")]
  Cursor(String),

  /// Filesystem or thread setup failure while opening a database or cursor.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Wrap an arbitrary error raised inside a cache factory.
  pub fn factory<E>(err: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    Self::Factory(err.into())
  }

  /// True when a single-result query found nothing.
  pub fn is_no_rows(&self) -> bool {
    matches!(self, Self::NoRows)
  }

  /// True when the error comes from context cancellation or an expired deadline.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled | Self::DeadlineExceeded)
  }
}

/// Failure to map a row's columns onto a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
  column: Option<String>,
  message: String,
}

impl ScanError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      column: None,
      message: message.into(),
    }
  }

  /// Attach the column name, keeping the innermost one if already set.
  pub fn in_column(mut self, column: &str) -> Self {
    if self.column.is_none() {
      self.column = Some(column.to_string());
    }
    self
  }

  pub fn column(&self) -> Option<&str> {
    self.column.as_deref()
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl fmt::Display for ScanError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.column {
      Some(column) => write!(f, "scan column `{}`: {}", column, self.message),
      None => write!(f, "scan: {}", self.message),
    }
  }
}

impl std::error::Error for ScanError {}

impl serde::de::Error for ScanError {
  fn custom<T: fmt::Display>(msg: T) -> Self {
    Self::new(msg.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scan_error_keeps_innermost_column() {
    let err = ScanError::new("invalid type").in_column("year").in_column("outer");
    assert_eq!(err.column(), Some("year"));
    assert_eq!(err.to_string(), "scan column `year`: invalid type");
  }

  #[test]
  fn test_factory_error_is_transparent() {
    let err = Error::factory("upstream unavailable");
    assert_eq!(err.to_string(), "upstream unavailable");
    assert!(!err.is_no_rows());
  }

  #[test]
  fn test_no_rows_is_distinguishable() {
    assert!(Error::NoRows.is_no_rows());
    assert!(!Error::Scan(ScanError::new("x")).is_no_rows());
    assert!(Error::DeadlineExceeded.is_cancelled());
  }
}
