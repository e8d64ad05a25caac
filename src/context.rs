//! Cooperative cancellation passed to every executor call and cache factory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
  cancelled: AtomicBool,
  deadline: Option<Instant>,
  parent: Option<Arc<Inner>>,
}

impl Inner {
  fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::Relaxed)
      || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
  }

  fn deadline(&self) -> Option<Instant> {
    let parent = self.parent.as_ref().and_then(|p| p.deadline());
    match (self.deadline, parent) {
      (Some(own), Some(parent)) => Some(own.min(parent)),
      (own, parent) => own.or(parent),
    }
  }
}

/// Cancellation-bearing context.
///
/// Cheap to clone; clones share cancellation state. Children created with
/// [`Context::child`] or [`Context::with_timeout`] observe their parent's
/// cancellation, but cancelling a child leaves the parent untouched.
#[derive(Debug, Clone)]
pub struct Context {
  inner: Arc<Inner>,
}

impl Context {
  /// A context that is never cancelled on its own.
  pub fn background() -> Self {
    Self {
      inner: Arc::new(Inner {
        cancelled: AtomicBool::new(false),
        deadline: None,
        parent: None,
      }),
    }
  }

  /// Derive a child context that can be cancelled independently.
  pub fn child(&self) -> Self {
    self.derive(None)
  }

  /// Derive a child context that expires after `timeout`.
  pub fn with_timeout(&self, timeout: Duration) -> Self {
    self.derive(Some(Instant::now() + timeout))
  }

  fn derive(&self, deadline: Option<Instant>) -> Self {
    Self {
      inner: Arc::new(Inner {
        cancelled: AtomicBool::new(false),
        deadline,
        parent: Some(Arc::clone(&self.inner)),
      }),
    }
  }

  /// Request cancellation of this context and its children.
  pub fn cancel(&self) {
    self.inner.cancelled.store(true, Ordering::Relaxed);
  }

  pub fn is_cancelled(&self) -> bool {
    self.inner.is_cancelled()
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.inner.deadline()
  }

  /// Fail with [`Error::Cancelled`] or [`Error::DeadlineExceeded`] if the
  /// context is done.
  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() {
      return Err(Error::Cancelled);
    }
    match self.deadline() {
      Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
      _ => Ok(()),
    }
  }
}

impl Default for Context {
  fn default() -> Self {
    Self::background()
  }
}
