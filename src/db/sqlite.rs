//! SQLite executor built on rusqlite.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::row::Row;
use super::traits::{Cursor, Queryer};
use crate::context::Context;
use crate::error::{Error, Result};

/// VM instructions between context checks while a statement runs.
const PROGRESS_OPS: i32 = 1_000;
const MAX_LOCK_BACKOFF: Duration = Duration::from_millis(25);

/// Connection settings for [`Database::open`].
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  /// Database file (default: $XDG_DATA_HOME/typed-rows/data.db)
  #[serde(default)]
  pub path: Option<PathBuf>,
  /// How long a statement waits on a locked database file, or on the
  /// connection while another cursor holds it
  #[serde(default = "default_busy_timeout_ms")]
  pub busy_timeout_ms: u64,
  /// Rows buffered ahead of a cursor consumer
  #[serde(default = "default_row_buffer")]
  pub row_buffer: usize,
}

fn default_busy_timeout_ms() -> u64 {
  5_000
}

fn default_row_buffer() -> usize {
  64
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      path: None,
      busy_timeout_ms: default_busy_timeout_ms(),
      row_buffer: default_row_buffer(),
    }
  }
}

/// SQLite database handle.
///
/// Clones share one connection. Statements run one at a time; an open cursor
/// holds the connection until it is closed, dropped or fully read. A statement
/// issued meanwhile waits at most the busy timeout (or until its context is
/// done) and then fails with [`Error::Cursor`].
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
  row_buffer: usize,
  lock_timeout: Duration,
}

impl Database {
  /// Open (or create) the database described by `config`.
  pub fn open(config: &DatabaseConfig) -> Result<Self> {
    let path = match &config.path {
      Some(path) => path.clone(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
      }
    }

    let conn = Connection::open(&path)?;
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
    conn.busy_timeout(busy_timeout)?;
    debug!(path = %path.display(), "opened database");

    Ok(Self::from_connection(conn, config.row_buffer).with_lock_timeout(busy_timeout))
  }

  /// Open a database file with default settings.
  pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
    Self::open(&DatabaseConfig {
      path: Some(path.as_ref().to_path_buf()),
      ..DatabaseConfig::default()
    })
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()?;
    Ok(Self::from_connection(conn, default_row_buffer()))
  }

  /// Wrap an already configured connection.
  pub fn from_connection(conn: Connection, row_buffer: usize) -> Self {
    Self {
      conn: Arc::new(Mutex::new(conn)),
      row_buffer,
      lock_timeout: Duration::from_millis(default_busy_timeout_ms()),
    }
  }

  /// Set how long a statement waits for the connection held by another cursor.
  pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
    self.lock_timeout = timeout;
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        Error::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          "could not determine data directory",
        ))
      })?;

    Ok(data_dir.join("typed-rows").join("data.db"))
  }

  /// Run a statement that produces no rows; returns the number of changed rows.
  pub fn execute(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<usize> {
    ctx.check()?;
    debug!(query = %fingerprint(sql), args = args.len(), "executing statement");
    let conn = lock_connection(&self.conn, ctx, self.lock_timeout)?;
    let _interrupt = InterruptWhenDone::install(&conn, ctx);
    let changed = conn
      .execute(sql, params_from_iter(args.iter()))
      .map_err(|e| query_failed(ctx, e))?;
    Ok(changed)
  }

  /// Run several semicolon-separated statements without arguments.
  pub fn execute_batch(&self, sql: &str) -> Result<()> {
    let conn = lock_connection(&self.conn, &Context::background(), self.lock_timeout)?;
    conn.execute_batch(sql)?;
    Ok(())
  }
}

impl std::fmt::Debug for Database {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Database")
      .field("row_buffer", &self.row_buffer)
      .field("lock_timeout", &self.lock_timeout)
      .finish_non_exhaustive()
  }
}

impl Queryer for Database {
  fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Box<dyn Cursor>> {
    ctx.check()?;
    debug!(query = %fingerprint(sql), args = args.len(), "submitting query");

    let (tx, rx) = mpsc::sync_channel(self.row_buffer);
    let conn = Arc::clone(&self.conn);
    let lock_timeout = self.lock_timeout;
    let ctx = ctx.clone();
    let sql = sql.to_string();
    let args = args.to_vec();

    let worker = thread::Builder::new()
      .name("typed-rows-cursor".to_string())
      .spawn(move || {
        let last = match stream_rows(&conn, lock_timeout, &ctx, &sql, &args, &tx) {
          Ok(()) => Message::Done,
          Err(err) => Message::Failed(err),
        };
        // Receiver may already be gone
        let _ = tx.send(last);
      })?;

    match rx.recv() {
      Ok(Message::Ready(columns)) => Ok(Box::new(SqliteCursor {
        columns,
        rows: Some(rx),
        worker: Some(worker),
        current: None,
        done: false,
      })),
      Ok(Message::Failed(err)) => {
        let _ = worker.join();
        Err(err)
      }
      Ok(Message::Row(_)) | Ok(Message::Done) | Err(_) => {
        let _ = worker.join();
        Err(Error::Cursor("cursor worker exited before the query started".to_string()))
      }
    }
  }
}

enum Message {
  Ready(Arc<[String]>),
  Row(Row),
  Done,
  Failed(Error),
}

/// Runs on the cursor worker: holds the connection and feeds rows to the
/// consumer until the result set ends, the consumer hangs up, or the context
/// is done.
fn stream_rows(
  conn: &Mutex<Connection>,
  lock_timeout: Duration,
  ctx: &Context,
  sql: &str,
  args: &[Value],
  tx: &SyncSender<Message>,
) -> Result<()> {
  let conn = lock_connection(conn, ctx, lock_timeout)?;
  let _interrupt = InterruptWhenDone::install(&conn, ctx);
  let mut stmt = conn.prepare(sql)?;
  let columns: Arc<[String]> = stmt
    .column_names()
    .into_iter()
    .map(String::from)
    .collect();
  let mut rows = stmt
    .query(params_from_iter(args.iter()))
    .map_err(|e| query_failed(ctx, e))?;

  if tx.send(Message::Ready(Arc::clone(&columns))).is_err() {
    return Ok(());
  }

  loop {
    ctx.check()?;
    let Some(row) = rows.next().map_err(|e| query_failed(ctx, e))? else {
      return Ok(());
    };
    // A step may finish after the deadline without being interrupted
    ctx.check()?;
    let values = (0..columns.len())
      .map(|index| row.get::<_, Value>(index))
      .collect::<rusqlite::Result<Vec<_>>>()?;
    if tx.send(Message::Row(Row::new(Arc::clone(&columns), values))).is_err() {
      trace!("cursor consumer hung up");
      return Ok(());
    }
  }
}

/// Progress handler that aborts the running statement once `ctx` is done.
/// Removed again on drop.
struct InterruptWhenDone<'c> {
  conn: &'c Connection,
}

impl<'c> InterruptWhenDone<'c> {
  fn install(conn: &'c Connection, ctx: &Context) -> Self {
    let ctx = ctx.clone();
    conn.progress_handler(PROGRESS_OPS, Some(move || ctx.check().is_err()));
    Self { conn }
  }
}

impl Drop for InterruptWhenDone<'_> {
  fn drop(&mut self) {
    self.conn.progress_handler(0, None::<fn() -> bool>);
  }
}

/// An interrupted statement reports the context outcome instead of
/// `SQLITE_INTERRUPT`.
fn query_failed(ctx: &Context, err: rusqlite::Error) -> Error {
  match ctx.check() {
    Err(done) => done,
    Ok(()) => Error::Query(err),
  }
}

/// Wait for the connection, giving up when `ctx` is done or after `timeout`.
fn lock_connection<'a>(
  conn: &'a Mutex<Connection>,
  ctx: &Context,
  timeout: Duration,
) -> Result<MutexGuard<'a, Connection>> {
  let started = Instant::now();
  let mut backoff = Duration::from_millis(1);
  loop {
    match conn.try_lock() {
      Ok(guard) => return Ok(guard),
      Err(TryLockError::Poisoned(e)) => {
        return Err(Error::Cursor(format!("connection lock poisoned: {}", e)))
      }
      Err(TryLockError::WouldBlock) => {}
    }
    ctx.check()?;
    if started.elapsed() >= timeout {
      return Err(Error::Cursor("connection held by an open cursor".to_string()));
    }
    thread::sleep(backoff);
    backoff = (backoff * 2).min(MAX_LOCK_BACKOFF);
  }
}

/// Short stable identifier for a SQL text, used to correlate log lines.
pub(crate) fn fingerprint(sql: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(sql.trim().as_bytes());
  let digest = hasher.finalize();
  hex::encode(&digest[..6])
}

/// Cursor streaming rows from a worker thread that owns the connection lock.
pub struct SqliteCursor {
  columns: Arc<[String]>,
  rows: Option<Receiver<Message>>,
  worker: Option<JoinHandle<()>>,
  current: Option<Row>,
  done: bool,
}

impl Cursor for SqliteCursor {
  fn columns(&self) -> &[String] {
    &self.columns
  }

  fn advance(&mut self) -> Result<bool> {
    self.current = None;
    if self.done {
      return Ok(false);
    }
    let Some(rows) = &self.rows else {
      return Err(Error::Cursor("cursor is closed".to_string()));
    };
    match rows.recv() {
      Ok(Message::Row(row)) => {
        self.current = Some(row);
        Ok(true)
      }
      Ok(Message::Done) => {
        self.done = true;
        Ok(false)
      }
      Ok(Message::Failed(err)) => Err(err),
      Ok(Message::Ready(_)) => Err(Error::Cursor("unexpected cursor message".to_string())),
      Err(_) => Err(Error::Cursor(
        "cursor worker exited before the end of the result set".to_string(),
      )),
    }
  }

  fn row(&self) -> Option<&Row> {
    self.current.as_ref()
  }

  fn close(&mut self) -> Result<()> {
    self.current = None;
    // Hanging up makes the worker stop at its next send
    drop(self.rows.take());
    match self.worker.take() {
      Some(worker) => worker
        .join()
        .map_err(|_| Error::Cursor("cursor worker panicked".to_string())),
      None => Ok(()),
    }
  }
}

impl Drop for SqliteCursor {
  fn drop(&mut self) {
    let _ = self.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seeded() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute_batch(
      "CREATE TABLE item (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
       INSERT INTO item (name) VALUES ('a'), ('b'), ('c');",
    )
    .unwrap();
    db
  }

  #[test]
  fn test_cursor_streams_rows_in_order() {
    let db = seeded();
    let ctx = Context::background();
    let mut cursor = db
      .query(&ctx, "SELECT id, name FROM item ORDER BY id", &[])
      .unwrap();
    assert_eq!(cursor.columns(), ["id", "name"]);

    let mut names = Vec::new();
    while cursor.advance().unwrap() {
      names.push(cursor.row().unwrap().get(1).cloned().unwrap());
    }
    assert_eq!(
      names,
      vec![
        Value::Text("a".into()),
        Value::Text("b".into()),
        Value::Text("c".into())
      ]
    );
    cursor.close().unwrap();
  }

  #[test]
  fn test_syntax_error_fails_at_submission() {
    let db = seeded();
    let result = db.query(&Context::background(), "SELEC nonsense", &[]);
    assert!(matches!(result, Err(Error::Query(_))));
  }

  #[test]
  fn test_argument_count_mismatch_fails_at_submission() {
    let db = seeded();
    let result = db.query(
      &Context::background(),
      "SELECT * FROM item WHERE id = ?",
      &[Value::Integer(1), Value::Integer(2)],
    );
    assert!(matches!(result, Err(Error::Query(_))));
  }

  #[test]
  fn test_closing_early_releases_connection() {
    let db = seeded();
    let ctx = Context::background();
    let mut cursor = db.query(&ctx, "SELECT id FROM item", &[]).unwrap();
    assert!(cursor.advance().unwrap());
    cursor.close().unwrap();

    // Connection is free again
    let changed = db
      .execute(&ctx, "DELETE FROM item WHERE id = ?", &[Value::Integer(1)])
      .unwrap();
    assert_eq!(changed, 1);
  }

  #[test]
  fn test_cancelled_context_stops_stream() {
    let conn = Connection::open_in_memory().unwrap();
    // Unbuffered, so the worker checks the context before every row
    let db = Database::from_connection(conn, 0);
    db.execute_batch(
      "CREATE TABLE item (id INTEGER PRIMARY KEY);
       INSERT INTO item (id) VALUES (1), (2), (3), (4), (5);",
    )
    .unwrap();

    let ctx = Context::background().child();
    let mut cursor = db.query(&ctx, "SELECT id FROM item", &[]).unwrap();
    assert!(cursor.advance().unwrap());
    ctx.cancel();

    let err = loop {
      match cursor.advance() {
        Ok(true) => continue,
        Ok(false) => panic!("stream finished despite cancellation"),
        Err(err) => break err,
      }
    };
    assert!(matches!(err, Error::Cancelled));
    cursor.close().unwrap();
  }

  #[test]
  fn test_done_context_fails_before_submission() {
    let db = seeded();
    let ctx = Context::background().child();
    ctx.cancel();
    assert!(matches!(
      db.query(&ctx, "SELECT id FROM item", &[]),
      Err(Error::Cancelled)
    ));
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("data.db");
    let db = Database::open_path(&path).unwrap();
    db.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
    assert!(path.exists());
  }

  #[test]
  fn test_fingerprint_is_stable() {
    assert_eq!(fingerprint("SELECT 1"), fingerprint("  SELECT 1\n"));
    assert_eq!(fingerprint("SELECT 1").len(), 12);
  }

  const LONG_SERIES: &str =
    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 30000000)";

  fn long_count() -> String {
    format!("{} SELECT count(*) FROM c", LONG_SERIES)
  }

  fn last_value(cursor: &mut Box<dyn Cursor>) -> Result<Option<Value>> {
    let mut last = None;
    while cursor.advance()? {
      last = cursor.row().and_then(|row| row.get(0)).cloned();
    }
    Ok(last)
  }

  #[test]
  fn test_deadline_interrupts_long_statement() {
    let db = seeded();
    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let started = Instant::now();

    let result = db
      .query(&ctx, &long_count(), &[])
      .and_then(|mut cursor| last_value(&mut cursor));
    assert!(matches!(result, Err(Error::DeadlineExceeded)), "{:?}", result);
    assert!(started.elapsed() < Duration::from_secs(5));

    // The handler is gone once the statement ends
    let mut cursor = db
      .query(&Context::background(), "SELECT count(*) FROM item", &[])
      .unwrap();
    assert_eq!(last_value(&mut cursor).unwrap(), Some(Value::Integer(3)));
  }

  #[test]
  fn test_cancel_interrupts_long_statement() {
    let db = seeded();
    let ctx = Context::background().child();
    let canceller = {
      let ctx = ctx.clone();
      thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        ctx.cancel();
      })
    };
    let started = Instant::now();

    let result = db
      .query(&ctx, &long_count(), &[])
      .and_then(|mut cursor| last_value(&mut cursor));
    canceller.join().unwrap();
    assert!(matches!(result, Err(Error::Cancelled)), "{:?}", result);
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[test]
  fn test_deadline_interrupts_execute() {
    let db = seeded();
    db.execute_batch("CREATE TABLE total (n INTEGER)").unwrap();
    let ctx = Context::background().with_timeout(Duration::from_millis(50));

    let sql = format!("{} INSERT INTO total (n) SELECT count(*) FROM c", LONG_SERIES);
    let result = db.execute(&ctx, &sql, &[]);
    assert!(matches!(result, Err(Error::DeadlineExceeded)), "{:?}", result);
  }

  fn many_items(n: i64) -> Database {
    let db = Database::open_in_memory().unwrap();
    db.execute_batch("CREATE TABLE item (id INTEGER PRIMARY KEY)")
      .unwrap();
    let ctx = Context::background();
    for id in 1..=n {
      db.execute(&ctx, "INSERT INTO item (id) VALUES (?)", &[Value::Integer(id)])
        .unwrap();
    }
    db
  }

  #[test]
  fn test_nested_query_gives_up_at_deadline() {
    // More rows than the channel buffers, so the outer cursor keeps the connection
    let db = many_items(200);
    let ctx = Context::background();
    let mut outer = db.query(&ctx, "SELECT id FROM item ORDER BY id", &[]).unwrap();

    assert!(outer.advance().unwrap());
    let nested = db.query(
      &ctx.with_timeout(Duration::from_millis(100)),
      "SELECT count(*) FROM item",
      &[],
    );
    assert!(matches!(nested, Err(Error::DeadlineExceeded)));

    // The outer cursor is unaffected
    let mut seen = 1;
    while outer.advance().unwrap() {
      seen += 1;
    }
    assert_eq!(seen, 200);
    outer.close().unwrap();

    let mut cursor = db.query(&ctx, "SELECT count(*) FROM item", &[]).unwrap();
    assert_eq!(last_value(&mut cursor).unwrap(), Some(Value::Integer(200)));
  }

  #[test]
  fn test_nested_statement_gives_up_after_lock_timeout() {
    let db = many_items(200).with_lock_timeout(Duration::from_millis(50));
    let ctx = Context::background();
    let mut outer = db.query(&ctx, "SELECT id FROM item", &[]).unwrap();
    assert!(outer.advance().unwrap());

    let err = db
      .execute(&ctx, "DELETE FROM item WHERE id = ?", &[Value::Integer(1)])
      .unwrap_err();
    assert!(matches!(err, Error::Cursor(_)), "{:?}", err);
    outer.close().unwrap();

    assert_eq!(
      db.execute(&ctx, "DELETE FROM item WHERE id = ?", &[Value::Integer(1)])
        .unwrap(),
      1
    );
  }

  fn detached_cursor(rx: Receiver<Message>, worker: JoinHandle<()>) -> SqliteCursor {
    SqliteCursor {
      columns: Arc::from(vec!["id".to_string()]),
      rows: Some(rx),
      worker: Some(worker),
      current: None,
      done: false,
    }
  }

  #[test]
  fn test_worker_crash_is_not_end_of_rows() {
    let (tx, rx) = mpsc::sync_channel(4);
    let worker = thread::spawn(move || {
      let columns: Arc<[String]> = Arc::from(vec!["id".to_string()]);
      let _ = tx.send(Message::Row(Row::new(columns, vec![Value::Integer(1)])));
      panic!("worker crashed");
    });
    let mut cursor = detached_cursor(rx, worker);

    assert!(cursor.advance().unwrap());
    assert!(matches!(cursor.advance(), Err(Error::Cursor(_))));
    assert!(matches!(cursor.close(), Err(Error::Cursor(_))));
  }

  #[test]
  fn test_done_message_ends_rows() {
    let (tx, rx) = mpsc::sync_channel(4);
    let worker = thread::spawn(move || {
      let _ = tx.send(Message::Done);
    });
    let mut cursor = detached_cursor(rx, worker);

    assert!(!cursor.advance().unwrap());
    // Still at the end, even though the worker has hung up
    assert!(!cursor.advance().unwrap());
    cursor.close().unwrap();
  }
}
