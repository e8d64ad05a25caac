//! Query executor: the cursor interface and its SQLite implementation.

mod row;
mod sqlite;
mod traits;

pub use row::Row;
pub use sqlite::{Database, DatabaseConfig, SqliteCursor};
pub use traits::{Cursor, Queryer};
