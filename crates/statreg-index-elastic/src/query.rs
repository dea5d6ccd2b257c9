//! Request bodies and response shapes of the Elasticsearch HTTP API.
//!
//! Documents are indexed with dynamic mapping, so every string field has a
//! `.keyword` sub-field; exact and prefix filters target that sub-field to
//! get the same semantics as [`SearchQuery::matches`].

use serde::Deserialize;
use serde_json::{Value, json};
use statreg_core::document::{ElasticDocument, SearchPage, SearchQuery};

// ─── Requests ────────────────────────────────────────────────────────────────

/// Writes wait for the next refresh, so `_count` and `_search` see them as
/// soon as the request returns.
pub const REFRESH: &str = "refresh=wait_for";

/// Path of one document, relative to the index.
pub fn doc_path(id: &str) -> String { format!("/_doc/{id}?{REFRESH}") }

/// Path of the `_bulk` endpoint, relative to the index.
pub fn bulk_path() -> String { format!("/_bulk?{REFRESH}") }

/// Newline-delimited `_bulk` body: one `index` action per document.
pub fn bulk_body(docs: &[ElasticDocument]) -> serde_json::Result<String> {
  let mut body = String::new();
  for doc in docs {
    body.push_str(&serde_json::to_string(&json!({ "index": { "_id": doc.id } }))?);
    body.push('\n');
    body.push_str(&serde_json::to_string(doc)?);
    body.push('\n');
  }
  Ok(body)
}

/// The `filter` clauses of the `bool` query for `query`.
pub fn filters(query: &SearchQuery) -> Vec<Value> {
  let mut clauses = Vec::new();

  if let Some(name) = query.name.as_deref().filter(|n| !n.trim().is_empty()) {
    clauses.push(json!({
      "prefix": { "name.keyword": { "value": name, "case_insensitive": true } }
    }));
  }
  if let Some(stat_id) = query.stat_id.as_deref().filter(|s| !s.is_empty()) {
    clauses.push(json!({ "prefix": { "stat_id.keyword": stat_id } }));
  }
  if let Some(tax_reg_id) = &query.tax_reg_id {
    clauses.push(json!({ "term": { "tax_reg_id.keyword": tax_reg_id } }));
  }
  if let Some(kind) = query.kind {
    clauses.push(json!({ "term": { "kind.keyword": kind.as_str() } }));
  }
  if let Some(region_id) = query.region_id {
    clauses.push(json!({ "term": { "region_id": region_id } }));
  }
  if let Some(activity) = &query.activity {
    clauses.push(json!({ "term": { "activities.keyword": activity } }));
  }
  if query.employees_min.is_some() || query.employees_max.is_some() {
    let mut range = serde_json::Map::new();
    if let Some(min) = query.employees_min {
      range.insert("gte".into(), min.into());
    }
    if let Some(max) = query.employees_max {
      range.insert("lte".into(), max.into());
    }
    clauses.push(json!({ "range": { "employees": range } }));
  }
  if !query.include_liquidated {
    clauses.push(json!({ "term": { "is_liquidated": false } }));
  }
  clauses
}

/// Full `_search` body: filters, paging and a stable sort by name then id.
pub fn search_body(query: &SearchQuery) -> Value {
  json!({
    "from": query.offset(),
    "size": query.limit(),
    "track_total_hits": true,
    "query": { "bool": { "filter": filters(query) } },
    "sort": [
      { "name.keyword": "asc" },
      { "id.keyword": "asc" }
    ]
  })
}

// ─── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CountResponse {
  pub count: u64,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
  hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
  total: Total,
  hits:  Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Total {
  value: u64,
}

#[derive(Debug, Deserialize)]
struct Hit {
  #[serde(rename = "_source")]
  source: ElasticDocument,
}

impl From<SearchResponse> for SearchPage {
  fn from(resp: SearchResponse) -> Self {
    SearchPage {
      documents: resp.hits.hits.into_iter().map(|h| h.source).collect(),
      total:     resp.hits.total.value,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
  pub errors: bool,
  #[serde(default)]
  items:      Vec<Value>,
}

impl BulkResponse {
  /// Number of items the cluster refused.
  pub fn rejected(&self) -> usize {
    if !self.errors {
      return 0;
    }
    self
      .items
      .iter()
      .filter(|item| item.get("index").and_then(|op| op.get("error")).is_some())
      .count()
  }
}
