//! Typed queries over SQLite with lazy, invalidatable result caches.
//!
//! - [`query`]: run a query once and decode a single row, every row, or a
//!   stream of rows into serde types.
//! - [`Cache`]: memoize the result of a bound query behind a read-write lock;
//!   refresh or invalidate it explicitly.
//! - [`Statement`] / [`NamedStatement`]: static SQL bound to a result type.
//! - [`Json`]: keep structured data in a single column.
//!
//! ```ignore
//! use typed_rows::{args, query, Context, Database};
//!
//! #[derive(Clone, serde::Deserialize)]
//! struct Book { id: i64, title: String, year: i32 }
//!
//! let db = Database::open_in_memory()?;
//! let ctx = Context::background();
//!
//! let demo: Book = query::get(&ctx, &db, "SELECT * FROM book WHERE title = ?", &args!["Demo"]?)?;
//!
//! let cache = query::cached_get::<Book, _>(db.clone(), "SELECT * FROM book WHERE id = ?", args![1]?);
//! let book = cache.get(&ctx)?; // runs the query
//! let book = cache.get(&ctx)?; // served from memory
//! cache.invalidate();          // next get runs the query again
//! ```

pub mod bind;
pub mod cache;
pub mod context;
pub mod db;
pub mod error;
pub mod iterator;
pub mod json;
pub mod query;
pub mod scan;
pub mod statement;

pub use cache::{Cache, Factory};
pub use context::Context;
pub use db::{Cursor, Database, DatabaseConfig, Queryer, Row};
pub use error::{Error, Result, ScanError};
pub use iterator::RowIterator;
pub use json::Json;
pub use rusqlite::types::Value;
pub use rusqlite::ToSql;
pub use statement::{NamedStatement, Statement};
