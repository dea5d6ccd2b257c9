//! Elasticsearch transport for the register's search mirror.
//!
//! [`ElasticIndex`] implements
//! [`SearchIndexClient`](statreg_core::index::SearchIndexClient) over the
//! plain HTTP API: single-document writes go through `_doc`, rebuilds through
//! `_bulk`, and searches are translated into a `bool` query by [`query`].

mod client;
pub mod error;
pub mod query;

pub use client::{ElasticConfig, ElasticIndex};
pub use error::{Error, Result};
