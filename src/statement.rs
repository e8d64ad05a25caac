//! Static SQL bound to a result type, executed later against any executor.

use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;

use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bind::bind_named;
use crate::cache::{Cache, Factory};
use crate::context::Context;
use crate::db::Queryer;
use crate::error::Result;
use crate::iterator::RowIterator;
use crate::query;

/// SQL with positional (`?`) parameters, returning rows of `T`.
///
/// ```ignore
/// const BY_AUTHOR: Statement<Book> = Statement::new("SELECT * FROM book WHERE author = ?");
/// let books = BY_AUTHOR.list(&ctx, &db, &args!["K&R"]?)?;
/// ```
pub struct Statement<T> {
  sql: Cow<'static, str>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> Statement<T> {
  pub const fn new(sql: &'static str) -> Self {
    Self {
      sql: Cow::Borrowed(sql),
      _marker: PhantomData,
    }
  }

  pub fn sql(&self) -> &str {
    &self.sql
  }
}

impl<T: DeserializeOwned> Statement<T> {
  /// See [`query::get`].
  pub fn get<Q: Queryer + ?Sized>(&self, ctx: &Context, db: &Q, args: &[Value]) -> Result<T> {
    query::get(ctx, db, &self.sql, args)
  }

  /// See [`query::list`].
  pub fn list<Q: Queryer + ?Sized>(&self, ctx: &Context, db: &Q, args: &[Value]) -> Result<Vec<T>> {
    query::list(ctx, db, &self.sql, args)
  }

  /// See [`query::iterate`].
  pub fn iterate<Q: Queryer + ?Sized>(
    &self,
    ctx: &Context,
    db: &Q,
    args: &[Value],
  ) -> RowIterator<T> {
    query::iterate(ctx, db, &self.sql, args)
  }
}

impl<T: DeserializeOwned + 'static> Statement<T> {
  /// See [`query::lazy_get`].
  pub fn lazy_get<Q: Queryer + 'static>(&self, db: Q, args: Vec<Value>) -> Factory<T> {
    query::lazy_get(db, self.sql.clone().into_owned(), args)
  }

  /// See [`query::lazy_list`].
  pub fn lazy_list<Q: Queryer + 'static>(&self, db: Q, args: Vec<Value>) -> Factory<Vec<T>> {
    query::lazy_list(db, self.sql.clone().into_owned(), args)
  }
}

impl<T: DeserializeOwned + Clone + 'static> Statement<T> {
  /// See [`query::cached_get`].
  pub fn cached_get<Q: Queryer + 'static>(&self, db: Q, args: Vec<Value>) -> Cache<T> {
    Cache::from_factory(self.lazy_get(db, args))
  }

  /// See [`query::cached_list`].
  pub fn cached_list<Q: Queryer + 'static>(&self, db: Q, args: Vec<Value>) -> Cache<Vec<T>> {
    Cache::from_factory(self.lazy_list(db, args))
  }
}

impl<T> From<String> for Statement<T> {
  fn from(sql: String) -> Self {
    Self {
      sql: Cow::Owned(sql),
      _marker: PhantomData,
    }
  }
}

impl<T> Clone for Statement<T> {
  fn clone(&self) -> Self {
    Self {
      sql: self.sql.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T> fmt::Debug for Statement<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Statement").field(&self.sql).finish()
  }
}

/// SQL with named (`:name`) parameters taken from a `P` value, returning rows
/// of `T`. See [`bind_named`] for the placeholder syntax.
pub struct NamedStatement<T, P: ?Sized> {
  sql: Cow<'static, str>,
  _marker: PhantomData<fn(&P) -> T>,
}

impl<T, P: ?Sized> NamedStatement<T, P> {
  pub const fn new(sql: &'static str) -> Self {
    Self {
      sql: Cow::Borrowed(sql),
      _marker: PhantomData,
    }
  }

  pub fn sql(&self) -> &str {
    &self.sql
  }
}

impl<T: DeserializeOwned, P: Serialize + ?Sized> NamedStatement<T, P> {
  /// See [`query::get`].
  pub fn get<Q: Queryer + ?Sized>(&self, ctx: &Context, db: &Q, params: &P) -> Result<T> {
    let (sql, args) = bind_named(&self.sql, params)?;
    query::get(ctx, db, &sql, &args)
  }

  /// See [`query::list`].
  pub fn list<Q: Queryer + ?Sized>(&self, ctx: &Context, db: &Q, params: &P) -> Result<Vec<T>> {
    let (sql, args) = bind_named(&self.sql, params)?;
    query::list(ctx, db, &sql, &args)
  }

  /// See [`query::iterate`]. A binding failure is reported by the iterator.
  pub fn iterate<Q: Queryer + ?Sized>(&self, ctx: &Context, db: &Q, params: &P) -> RowIterator<T> {
    match bind_named(&self.sql, params) {
      Ok((sql, args)) => query::iterate(ctx, db, &sql, &args),
      Err(err) => RowIterator::failed(err),
    }
  }
}

impl<T, P: ?Sized> From<String> for NamedStatement<T, P> {
  fn from(sql: String) -> Self {
    Self {
      sql: Cow::Owned(sql),
      _marker: PhantomData,
    }
  }
}

impl<T, P: ?Sized> Clone for NamedStatement<T, P> {
  fn clone(&self) -> Self {
    Self {
      sql: self.sql.clone(),
      _marker: PhantomData,
    }
  }
}

impl<T, P: ?Sized> fmt::Debug for NamedStatement<T, P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("NamedStatement").field(&self.sql).finish()
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use serde::Deserialize;

  use super::*;
  use crate::db::Database;
  use crate::error::Error;

  #[derive(Debug, Clone, Deserialize, PartialEq)]
  struct Book {
    id: i64,
    title: String,
    year: i32,
  }

  #[derive(Serialize)]
  struct Since {
    year: i32,
  }

  const ALL: Statement<Book> = Statement::new("SELECT id, title, year FROM book ORDER BY id");
  const BY_TITLE: Statement<Book> = Statement::new("SELECT id, title, year FROM book WHERE title = ?");
  const SINCE: NamedStatement<Book, Since> =
    NamedStatement::new("SELECT id, title, year FROM book WHERE year >= :year ORDER BY year");

  fn seeded() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute_batch(
      "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT NOT NULL, year INTEGER NOT NULL);
       INSERT INTO book (title, year) VALUES ('Demo', 2022), ('Example', 1980), ('C', 1970);",
    )
    .unwrap();
    db
  }

  #[test]
  fn test_statement_get_list_iterate() {
    let db = seeded();
    let ctx = Context::background();

    let book = BY_TITLE
      .get(&ctx, &db, &[Value::Text("C".into())])
      .unwrap();
    assert_eq!(book.year, 1970);
    assert_eq!(ALL.list(&ctx, &db, &[]).unwrap().len(), 3);
    assert_eq!(ALL.iterate(&ctx, &db, &[]).collect().unwrap().len(), 3);
  }

  #[test]
  fn test_statement_cached_get() {
    let db = seeded();
    let ctx = Context::background();
    let cache = BY_TITLE.cached_get(db.clone(), vec![Value::Text("Demo".into())]);

    assert_eq!(cache.get(&ctx).unwrap().year, 2022);
    db.execute(&ctx, "UPDATE book SET year = 2024 WHERE title = 'Demo'", &[])
      .unwrap();
    assert_eq!(cache.get(&ctx).unwrap().year, 2022);
    cache.refresh(&ctx).unwrap();
    assert_eq!(cache.get(&ctx).unwrap().year, 2024);
  }

  #[test]
  fn test_named_statement() {
    let db = seeded();
    let ctx = Context::background();

    let books = SINCE.list(&ctx, &db, &Since { year: 1975 }).unwrap();
    let titles: Vec<_> = books.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles, ["Example", "Demo"]);

    let oldest = SINCE.get(&ctx, &db, &Since { year: 0 }).unwrap();
    assert_eq!(oldest.title, "C");
  }

  #[test]
  fn test_named_statement_with_map() {
    let db = seeded();
    let stmt: NamedStatement<Book, HashMap<&str, &str>> =
      NamedStatement::from("SELECT id, title, year FROM book WHERE title = :title".to_string());

    let params = HashMap::from([("title", "Example")]);
    let book = stmt.get(&Context::background(), &db, &params).unwrap();
    assert_eq!(book.id, 2);
  }

  #[test]
  fn test_named_prep_error_before_round_trip() {
    let db = seeded();
    let stmt: NamedStatement<Book, HashMap<&str, i32>> =
      NamedStatement::new("SELECT * FROM book WHERE year = :year");
    let params = HashMap::new();

    let err = stmt.get(&Context::background(), &db, &params).unwrap_err();
    assert!(matches!(err, Error::StatementPrep(_)));

    let rows = stmt.iterate(&Context::background(), &db, &params);
    assert!(matches!(rows.err(), Some(Error::StatementPrep(_))));
  }
}
