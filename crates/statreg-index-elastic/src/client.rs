//! HTTP client for one Elasticsearch index.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use statreg_core::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  ids::UnitKey,
  index::SearchIndexClient,
};
use tracing::{debug, warn};

use crate::{
  error::{Error, Result},
  query::{BulkResponse, CountResponse, SearchResponse, bulk_body, bulk_path, doc_path, search_body},
};

/// Connection settings for the search cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct ElasticConfig {
  pub url:          String,
  #[serde(default = "default_index")]
  pub index:        String,
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
}

fn default_index() -> String { "statunitsearchview".into() }

fn default_timeout() -> u64 { 30 }

/// Async client for the register's search index.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
  client: Client,
  base:   String,
  index:  String,
}

impl ElasticIndex {
  pub fn new(config: &ElasticConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      base: config.url.trim_end_matches('/').to_owned(),
      index: config.index.clone(),
    })
  }

  fn url(&self, path: &str) -> String { format!("{}/{}{}", self.base, self.index, path) }

  /// Fail with the response body unless the status is a success, or one of
  /// `tolerated`.
  async fn check(op: &'static str, resp: Response, tolerated: &[StatusCode]) -> Result<Response> {
    let status = resp.status();
    if status.is_success() || tolerated.contains(&status) {
      return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Status { op, status, body })
  }
}

impl SearchIndexClient for ElasticIndex {
  type Error = Error;

  /// `PUT /{index}/_doc/{id}?refresh=wait_for`
  async fn upsert(&self, doc: ElasticDocument) -> Result<()> {
    let resp = self
      .client
      .put(self.url(&doc_path(&doc.id)))
      .json(&doc)
      .send()
      .await?;
    Self::check("PUT _doc", resp, &[]).await?;
    Ok(())
  }

  /// `DELETE /{index}/_doc/{id}?refresh=wait_for`; a missing document or
  /// index is fine.
  async fn delete(&self, key: UnitKey) -> Result<()> {
    let resp = self
      .client
      .delete(self.url(&doc_path(&key.document_id())))
      .send()
      .await?;
    Self::check("DELETE _doc", resp, &[StatusCode::NOT_FOUND]).await?;
    Ok(())
  }

  /// `POST /{index}/_bulk?refresh=wait_for`
  async fn bulk_upsert(&self, docs: Vec<ElasticDocument>) -> Result<()> {
    if docs.is_empty() {
      return Ok(());
    }
    let body = bulk_body(&docs)?;
    let resp = self
      .client
      .post(self.url(&bulk_path()))
      .header(CONTENT_TYPE, "application/x-ndjson")
      .body(body)
      .send()
      .await?;
    let resp: BulkResponse = Self::check("POST _bulk", resp, &[]).await?.json().await?;
    match resp.rejected() {
      0 => {
        debug!(documents = docs.len(), "bulk upsert accepted");
        Ok(())
      }
      rejected => {
        warn!(rejected, documents = docs.len(), "bulk upsert partially rejected");
        Err(Error::BulkRejected(rejected))
      }
    }
  }

  /// `DELETE /{index}`. The index is recreated by the next write.
  async fn delete_all(&self) -> Result<()> {
    let resp = self.client.delete(self.url("")).send().await?;
    Self::check("DELETE index", resp, &[StatusCode::NOT_FOUND]).await?;
    Ok(())
  }

  /// `GET /{index}/_count`; a missing index counts zero.
  async fn count(&self) -> Result<u64> {
    let resp = self.client.get(self.url("/_count")).send().await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(0);
    }
    let resp: CountResponse = Self::check("GET _count", resp, &[]).await?.json().await?;
    Ok(resp.count)
  }

  /// `GET /`
  async fn ping(&self) -> bool {
    match self.client.get(&self.base).send().await {
      Ok(resp) => resp.status().is_success(),
      Err(e) => {
        debug!(error = %e, "search cluster ping failed");
        false
      }
    }
  }

  /// `POST /{index}/_search`; a missing index yields an empty page.
  async fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
    let resp = self
      .client
      .post(self.url("/_search"))
      .json(&search_body(query))
      .send()
      .await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(SearchPage::default());
    }
    let resp: SearchResponse = Self::check("POST _search", resp, &[]).await?.json().await?;
    Ok(resp.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn urls_are_scoped_to_the_index() {
    let config = ElasticConfig {
      url:          "http://localhost:9200/".into(),
      index:        "units".into(),
      timeout_secs: 5,
    };
    let index = ElasticIndex::new(&config).unwrap();
    assert_eq!(index.url("/_count"), "http://localhost:9200/units/_count");
    assert_eq!(index.url(""), "http://localhost:9200/units");
    assert_eq!(index.url(&bulk_path()), "http://localhost:9200/units/_bulk?refresh=wait_for");
  }

  #[test]
  fn config_defaults_fill_index_and_timeout() {
    let config: ElasticConfig = serde_json::from_str(r#"{ "url": "http://es:9200" }"#).unwrap();
    assert_eq!(config.index, "statunitsearchview");
    assert_eq!(config.timeout_secs, 30);
  }
}
