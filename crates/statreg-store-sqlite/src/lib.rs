//! SQLite backend for the statistical business register.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every [`WriteBatch`] is applied inside
//! one SQLite transaction.
//!
//! [`WriteBatch`]: statreg_core::store::WriteBatch

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
