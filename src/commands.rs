//! Subcommands of the demo binary, run against a `book` table.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::info;
use typed_rows::{args, query, Cache, Context, Database, Error, Json, NamedStatement, Statement};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Create the book table and insert sample rows
  Seed,
  /// Print one book
  Get { id: i64 },
  /// Print all books, optionally published since a year
  List {
    #[arg(long, default_value_t = 0)]
    since: i32,
  },
  /// Stream books one JSON line at a time
  Stream,
  /// Share one cached query between concurrent readers
  CacheDemo {
    #[arg(long, default_value_t = 8)]
    readers: usize,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
  pub id: i64,
  pub title: String,
  pub author: Option<String>,
  pub year: i32,
  pub tags: Json<Vec<String>>,
  pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Since {
  year: i32,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS book (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    author TEXT,
    year INTEGER NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    added_at TEXT NOT NULL
);
";

const SEED_BOOKS: &[(&str, &str, i32, &[&str])] = &[
  ("Demo", "reddec", 2022, &["generics"]),
  ("Example", "Rob Pike", 1980, &["unix", "classic"]),
  ("C", "K&R", 1970, &["systems", "classic"]),
];

const ALL: Statement<Book> = Statement::new("SELECT * FROM book ORDER BY id");
const BY_ID: Statement<Book> = Statement::new("SELECT * FROM book WHERE id = ?");
const SINCE: NamedStatement<Book, Since> =
  NamedStatement::new("SELECT * FROM book WHERE year >= :year ORDER BY year");

pub async fn run(command: Command, db: &Database, ctx: &Context) -> Result<()> {
  match command {
    Command::Seed => seed(db, ctx),
    Command::Get { id } => get(db, ctx, id),
    Command::List { since } => list(db, ctx, since),
    Command::Stream => stream(db, ctx),
    Command::CacheDemo { readers } => cache_demo(db, ctx, readers).await,
  }
}

fn seed(db: &Database, ctx: &Context) -> Result<()> {
  db.execute_batch(SCHEMA)?;

  let count: i64 = query::get(ctx, db, "SELECT count(*) FROM book", &[])?;
  if count > 0 {
    info!(count, "book table already seeded");
    println!("book table already has {} rows", count);
    return Ok(());
  }

  let added_at = Utc::now().to_rfc3339();
  for &(title, author, year, tags) in SEED_BOOKS {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    db.execute(
      ctx,
      "INSERT INTO book (title, author, year, tags, added_at) VALUES (?, ?, ?, ?, ?)",
      &args![title, author, year, Json(tags), added_at]?,
    )?;
  }
  info!(count = SEED_BOOKS.len(), "seeded book table");
  println!("inserted {} books", SEED_BOOKS.len());
  Ok(())
}

fn get(db: &Database, ctx: &Context, id: i64) -> Result<()> {
  match BY_ID.get(ctx, db, &args![id]?) {
    Ok(book) => print_json(&book),
    Err(Error::NoRows) => Err(eyre!("book {} not found", id)),
    Err(err) => Err(err.into()),
  }
}

fn list(db: &Database, ctx: &Context, since: i32) -> Result<()> {
  let books = SINCE.list(ctx, db, &Since { year: since })?;
  print_json(&books)
}

fn stream(db: &Database, ctx: &Context) -> Result<()> {
  let mut books = ALL.iterate(ctx, db, &[]);
  let mut seen = 0;
  while books.advance() {
    let book = books.get()?;
    println!("{}", serde_json::to_string(&book)?);
    seen += 1;
  }
  if let Some(err) = books.err() {
    return Err(eyre!("stream stopped after {} books: {}", seen, err));
  }
  books.close()?;
  Ok(())
}

async fn cache_demo(db: &Database, ctx: &Context, readers: usize) -> Result<()> {
  let id = query::get::<i64, _>(ctx, db, "SELECT min(id) FROM book", &[])
    .map_err(|e| eyre!("run `seed` first: {}", e))?;

  let fills = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&fills);
  let factory = BY_ID.lazy_get(db.clone(), args![id]?);
  let cache = Arc::new(Cache::new(move |ctx: &Context| {
    counter.fetch_add(1, Ordering::SeqCst);
    factory(ctx)
  }));

  let readers = (0..readers.max(1)).map(|_| {
    let cache = Arc::clone(&cache);
    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || cache.get(&ctx))
  });
  let books = try_join_all(readers)
    .await?
    .into_iter()
    .collect::<typed_rows::Result<Vec<Book>>>()?;
  info!(
    readers = books.len(),
    fills = fills.load(Ordering::SeqCst),
    "concurrent readers served"
  );
  println!(
    "{} readers got \"{}\" from {} fill(s)",
    books.len(),
    books[0].title,
    fills.load(Ordering::SeqCst)
  );

  db.execute(ctx, "UPDATE book SET year = year + 1 WHERE id = ?", &args![id]?)?;
  let stale = cache.get(ctx)?;
  cache.invalidate();
  let fresh = cache.get(ctx)?;
  println!(
    "after update: cached year {}, after invalidate {} ({} fills)",
    stale.year,
    fresh.year,
    fills.load(Ordering::SeqCst)
  );
  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
