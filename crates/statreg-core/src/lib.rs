//! Core types and trait definitions for the statistical business register.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the unit data model, the pure history tracker, and the boundary traits that
//! storage and search backends implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod document;
pub mod error;
pub mod history;
pub mod hooks;
pub mod ids;
pub mod index;
pub mod store;
pub mod unit;

pub use error::{Error, Result};
