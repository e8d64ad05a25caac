//! Typed, pull-based iteration over a query cursor.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::db::Cursor;
use crate::error::{Error, Result, ScanError};

/// Typed wrapper around a [`Cursor`] which decodes each row into `T`.
///
/// The iterator owns the cursor. It is released by [`RowIterator::close`], by
/// [`RowIterator::collect`], or when the iterator is dropped, whichever comes
/// first.
///
/// ```ignore
/// let mut books = query::iterate::<Book, _>(&ctx, &db, "SELECT * FROM book", &[]);
/// while books.advance() {
///   let book = books.get()?;
///   println!("{}", book.title);
/// }
/// if let Some(err) = books.err() {
///   eprintln!("iteration stopped: {err}");
/// }
/// books.close()?;
/// ```
pub struct RowIterator<T> {
  err: Option<Error>,
  cursor: Option<Box<dyn Cursor>>,
  _marker: PhantomData<fn() -> T>,
}

impl<T> RowIterator<T> {
  /// Wrap an open cursor.
  pub fn new(cursor: Box<dyn Cursor>) -> Self {
    Self {
      err: None,
      cursor: Some(cursor),
      _marker: PhantomData,
    }
  }

  /// An iterator for a query that could not be submitted.
  pub fn failed(err: Error) -> Self {
    Self {
      err: Some(err),
      cursor: None,
      _marker: PhantomData,
    }
  }

  /// Read the next row; returns true if data is available.
  ///
  /// Always false once an error has been recorded.
  pub fn advance(&mut self) -> bool {
    if self.err.is_some() {
      return false;
    }
    let Some(cursor) = self.cursor.as_mut() else {
      return false;
    };
    match cursor.advance() {
      Ok(more) => more,
      Err(err) => {
        self.err = Some(err);
        false
      }
    }
  }

  /// The submission error, or the cursor/scan error that stopped iteration.
  pub fn err(&self) -> Option<&Error> {
    self.err.as_ref()
  }

  /// Column names of the result set (empty if the query never started).
  pub fn columns(&self) -> &[String] {
    match &self.cursor {
      Some(cursor) => cursor.columns(),
      None => &[],
    }
  }

  /// Close the cursor and release the connection it holds.
  pub fn close(mut self) -> Result<()> {
    self.release()
  }

  pub(crate) fn take_err(&mut self) -> Option<Error> {
    self.err.take()
  }

  fn release(&mut self) -> Result<()> {
    match self.cursor.take() {
      Some(mut cursor) => cursor.close(),
      None => Ok(()),
    }
  }
}

impl<T: DeserializeOwned> RowIterator<T> {
  /// Decode the current row. Does not advance.
  pub fn get(&mut self) -> Result<T> {
    if let Some(err) = &self.err {
      return Err(ScanError::new(format!("cursor error: {}", err)).into());
    }
    let Some(row) = self.cursor.as_ref().and_then(|cursor| cursor.row()) else {
      return Err(ScanError::new("no current row").into());
    };
    match row.decode::<T>() {
      Ok(value) => Ok(value),
      Err(err) => {
        self.err = Some(Error::Scan(err.clone()));
        Err(Error::Scan(err))
      }
    }
  }

  /// Collect all remaining rows and close the cursor.
  ///
  /// Stops at the first failure and returns it without partial results. Zero
  /// rows is an empty vector.
  pub fn collect(mut self) -> Result<Vec<T>> {
    let drained = self.drain();
    let released = self.release();
    let values = drained?;
    released?;
    Ok(values)
  }

  fn drain(&mut self) -> Result<Vec<T>> {
    let mut values = Vec::new();
    while self.advance() {
      values.push(self.get()?);
    }
    match self.err.take() {
      Some(err) => Err(err),
      None => Ok(values),
    }
  }
}

impl<T> Drop for RowIterator<T> {
  fn drop(&mut self) {
    let _ = self.release();
  }
}

impl<T> std::fmt::Debug for RowIterator<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RowIterator")
      .field("err", &self.err)
      .field("open", &self.cursor.is_some())
      .finish()
  }
}
