//! Lazy, invalidatable caching of query results.
//!
//! A [`Cache`] wraps a [`Factory`] (usually one bound by
//! [`crate::query::lazy_get`] or [`crate::query::lazy_list`]) and memoizes its
//! last successful result until it is invalidated or refreshed.

mod layer;

pub use layer::{Cache, Factory};
