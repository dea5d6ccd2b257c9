//! The `SearchIndexClient` trait: transport to the search mirror.

use std::future::Future;

use crate::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  ids::UnitKey,
};

/// A search backend holding [`ElasticDocument`]s keyed by
/// [`UnitKey::document_id`].
///
/// Every failure is recoverable from the caller's point of view: the mirror
/// can always be rebuilt from the store.
pub trait SearchIndexClient: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Create or replace one document.
  fn upsert(
    &self,
    doc: ElasticDocument,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remove one document. Removing an absent document is not an error.
  fn delete(&self, key: UnitKey) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn bulk_upsert(
    &self,
    docs: Vec<ElasticDocument>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Drop every document (and the index itself, where that applies).
  fn delete_all(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn count(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn ping(&self) -> impl Future<Output = bool> + Send + '_;

  fn search<'a>(
    &'a self,
    query: &'a SearchQuery,
  ) -> impl Future<Output = Result<SearchPage, Self::Error>> + Send + 'a;
}
