//! An in-process search mirror.

use std::{collections::BTreeMap, convert::Infallible};

use statreg_core::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  ids::UnitKey,
  index::SearchIndexClient,
};
use tokio::sync::RwLock;

/// A [`SearchIndexClient`] holding documents in a map. Used when no external
/// search cluster is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryIndex {
  docs: RwLock<BTreeMap<String, ElasticDocument>>,
}

impl MemoryIndex {
  pub fn new() -> Self { Self::default() }

  /// Direct read of one document, bypassing search semantics.
  pub async fn document(&self, key: UnitKey) -> Option<ElasticDocument> {
    self.docs.read().await.get(&key.document_id()).cloned()
  }
}

impl SearchIndexClient for MemoryIndex {
  type Error = Infallible;

  async fn upsert(&self, doc: ElasticDocument) -> Result<(), Infallible> {
    self.docs.write().await.insert(doc.id.clone(), doc);
    Ok(())
  }

  async fn delete(&self, key: UnitKey) -> Result<(), Infallible> {
    self.docs.write().await.remove(&key.document_id());
    Ok(())
  }

  async fn bulk_upsert(&self, docs: Vec<ElasticDocument>) -> Result<(), Infallible> {
    let mut map = self.docs.write().await;
    for doc in docs {
      map.insert(doc.id.clone(), doc);
    }
    Ok(())
  }

  async fn delete_all(&self) -> Result<(), Infallible> {
    self.docs.write().await.clear();
    Ok(())
  }

  async fn count(&self) -> Result<u64, Infallible> { Ok(self.docs.read().await.len() as u64) }

  async fn ping(&self) -> bool { true }

  async fn search(&self, query: &SearchQuery) -> Result<SearchPage, Infallible> {
    let map = self.docs.read().await;
    let mut hits: Vec<&ElasticDocument> = map.values().filter(|d| query.matches(d)).collect();
    hits.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    let total = hits.len() as u64;
    let documents = hits
      .into_iter()
      .skip(query.offset())
      .take(query.limit())
      .cloned()
      .collect();
    Ok(SearchPage { documents, total })
  }
}
