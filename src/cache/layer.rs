//! Single-slot value cache with double-checked filling.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::context::Context;
use crate::error::Error;

/// A zero-argument fallible producer: the fill operation of a [`Cache`].
pub type Factory<T, E = Error> = Box<dyn Fn(&Context) -> Result<T, E> + Send + Sync>;

struct Slot<T> {
  value: Option<T>,
  valid: bool,
}

impl<T> Slot<T> {
  fn fresh(&self) -> Option<&T> {
    if self.valid {
      self.value.as_ref()
    } else {
      None
    }
  }

  fn fill(&mut self, value: T) -> &T {
    self.valid = true;
    self.value.insert(value)
  }
}

/// Concurrent-safe cache for the result of a factory.
///
/// The first [`Cache::get`] runs the factory and stores the result. Later
/// calls return the stored value until [`Cache::invalidate`] marks it stale.
/// Readers of a filled cache share a read lock; fills and refreshes take the
/// write lock, so at most one factory call runs at a time.
///
/// A failed fill leaves the cache empty and hands the error to the caller
/// that ran it. Callers that were waiting on the same fill re-check the slot
/// once they get the lock and, finding it still empty, run the factory
/// themselves.
pub struct Cache<T, E = Error> {
  slot: RwLock<Slot<T>>,
  factory: Factory<T, E>,
}

impl<T: Clone, E> Cache<T, E> {
  /// Create an empty cache around `factory`.
  pub fn new<F>(factory: F) -> Self
  where
    F: Fn(&Context) -> Result<T, E> + Send + Sync + 'static,
  {
    Self::from_factory(Box::new(factory))
  }

  /// Create an empty cache around an already boxed factory.
  pub fn from_factory(factory: Factory<T, E>) -> Self {
    Self {
      slot: RwLock::new(Slot {
        value: None,
        valid: false,
      }),
      factory,
    }
  }

  /// Get the cached value, filling the cache first if it is empty.
  pub fn get(&self, ctx: &Context) -> Result<T, E> {
    if let Some(value) = self.read().fresh() {
      return Ok(value.clone());
    }

    let mut slot = self.write();
    if let Some(value) = slot.fresh() {
      // Filled by another caller while we waited for the lock
      return Ok(value.clone());
    }

    trace!("cache empty, running factory");
    let value = (self.factory)(ctx)?;
    Ok(slot.fill(value).clone())
  }

  /// Run the factory regardless of validity and store the result.
  ///
  /// On failure the cache keeps whatever it held before.
  pub fn refresh(&self, ctx: &Context) -> Result<(), E> {
    let mut slot = self.write();
    trace!("refreshing cache");
    let value = (self.factory)(ctx)?;
    slot.fill(value);
    Ok(())
  }

  /// Mark the cached value stale; the next [`Cache::get`] runs the factory.
  pub fn invalidate(&self) {
    self.write().valid = false;
  }

  /// Whether the next [`Cache::get`] will be served without a fill.
  pub fn is_valid(&self) -> bool {
    self.read().valid
  }

  // The slot is only written after the factory succeeds, so a panic while a
  // guard is held cannot leave it half-updated.
  fn read(&self) -> RwLockReadGuard<'_, Slot<T>> {
    self.slot.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, Slot<T>> {
    self.slot.write().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Clone, E> std::fmt::Debug for Cache<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Cache")
      .field("valid", &self.is_valid())
      .finish_non_exhaustive()
  }
}
