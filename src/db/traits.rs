//! Executor interface consumed by the query helpers.

use std::sync::Arc;

use rusqlite::types::Value;

use super::row::Row;
use crate::context::Context;
use crate::error::Result;

/// An open, stateful handle over a query's result rows.
///
/// A cursor holds executor resources (for [`super::Database`], the connection
/// itself) until [`Cursor::close`] is called or it is dropped.
pub trait Cursor: Send {
  /// Column names of the result set.
  fn columns(&self) -> &[String];

  /// Move to the next row. `Ok(false)` means the result set is exhausted.
  fn advance(&mut self) -> Result<bool>;

  /// The row the cursor is positioned on, if any.
  fn row(&self) -> Option<&Row>;

  /// Release the cursor. Callers invoke this at most once.
  fn close(&mut self) -> Result<()>;
}

/// Anything that can run a parameterized query and hand back a cursor.
pub trait Queryer: Send + Sync {
  /// Submit `sql` with positional `args`.
  ///
  /// Errors returned here happened before any row was produced (syntax,
  /// argument count, connectivity, a context that is already done).
  fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Box<dyn Cursor>>;
}

impl<Q: Queryer + ?Sized> Queryer for &Q {
  fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Box<dyn Cursor>> {
    (**self).query(ctx, sql, args)
  }
}

impl<Q: Queryer + ?Sized> Queryer for Arc<Q> {
  fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Box<dyn Cursor>> {
    (**self).query(ctx, sql, args)
  }
}

impl<Q: Queryer + ?Sized> Queryer for Box<Q> {
  fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Box<dyn Cursor>> {
    (**self).query(ctx, sql, args)
  }
}
