//! Query helpers that materialize rows into typed values.
//!
//! These functions hold no state; each call is one independent round trip to
//! the executor.
//!
//! # Example
//!
//! ```ignore
//! let db = Database::open_in_memory()?;
//! let ctx = Context::background();
//!
//! let book: Book = query::get(&ctx, &db, "SELECT * FROM book WHERE id = ?", &args![1]?)?;
//! let all: Vec<Book> = query::list(&ctx, &db, "SELECT * FROM book ORDER BY id", &[])?;
//!
//! // Deferred and cached
//! let newest = query::cached_get::<Book, _>(db.clone(), "SELECT * FROM book ORDER BY year DESC", vec![]);
//! let book = newest.get(&ctx)?;
//! newest.invalidate();
//! ```

use rusqlite::types::Value;
use serde::de::DeserializeOwned;

use crate::cache::{Cache, Factory};
use crate::context::Context;
use crate::db::{Cursor, Queryer};
use crate::error::{Error, Result};
use crate::iterator::RowIterator;

/// Get a single result or fail.
///
/// Only the first row is read; zero rows is [`Error::NoRows`].
pub fn get<T, Q>(ctx: &Context, db: &Q, sql: &str, args: &[Value]) -> Result<T>
where
  T: DeserializeOwned,
  Q: Queryer + ?Sized,
{
  let mut rows = iterate::<T, Q>(ctx, db, sql, args);
  let value = if rows.advance() {
    rows.get()
  } else {
    Err(rows.take_err().unwrap_or(Error::NoRows))
  };
  let released = rows.close();
  let value = value?;
  released?;
  Ok(value)
}

/// Collect every result row. Zero rows is an empty vector.
pub fn list<T, Q>(ctx: &Context, db: &Q, sql: &str, args: &[Value]) -> Result<Vec<T>>
where
  T: DeserializeOwned,
  Q: Queryer + ?Sized,
{
  iterate::<T, Q>(ctx, db, sql, args).collect()
}

/// Start iterating over results. A submission failure is reported by the
/// returned iterator.
pub fn iterate<T, Q>(ctx: &Context, db: &Q, sql: &str, args: &[Value]) -> RowIterator<T>
where
  Q: Queryer + ?Sized,
{
  match db.query(ctx, sql, args) {
    Ok(cursor) => RowIterator::new(cursor),
    Err(err) => RowIterator::failed(err),
  }
}

/// Wrap an already open cursor.
pub fn rows<T>(cursor: Box<dyn Cursor>) -> RowIterator<T> {
  RowIterator::new(cursor)
}

/// Bind a single-result query to its arguments; every call of the returned
/// factory runs the query again. Nothing is cached, use [`cached_get`] for that.
pub fn lazy_get<T, Q>(db: Q, sql: impl Into<String>, args: Vec<Value>) -> Factory<T>
where
  T: DeserializeOwned + 'static,
  Q: Queryer + 'static,
{
  let sql = sql.into();
  Box::new(move |ctx: &Context| get(ctx, &db, &sql, &args))
}

/// Bind a list query to its arguments; every call of the returned factory runs
/// the query again. Nothing is cached, use [`cached_list`] for that.
pub fn lazy_list<T, Q>(db: Q, sql: impl Into<String>, args: Vec<Value>) -> Factory<Vec<T>>
where
  T: DeserializeOwned + 'static,
  Q: Queryer + 'static,
{
  let sql = sql.into();
  Box::new(move |ctx: &Context| list(ctx, &db, &sql, &args))
}

/// [`Cache`] over [`lazy_get`].
pub fn cached_get<T, Q>(db: Q, sql: impl Into<String>, args: Vec<Value>) -> Cache<T>
where
  T: DeserializeOwned + Clone + 'static,
  Q: Queryer + 'static,
{
  Cache::from_factory(lazy_get(db, sql, args))
}

/// [`Cache`] over [`lazy_list`].
pub fn cached_list<T, Q>(db: Q, sql: impl Into<String>, args: Vec<Value>) -> Cache<Vec<T>>
where
  T: DeserializeOwned + Clone + 'static,
  Q: Queryer + 'static,
{
  Cache::from_factory(lazy_list(db, sql, args))
}
