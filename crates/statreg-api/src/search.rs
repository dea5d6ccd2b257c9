//! Handlers for the search mirror.
//!
//! `GET /search` takes the [`SearchQuery`] fields as query params, e.g.
//! `?name=bak&kind=legal_unit&employees_min=10&page=1`.
//! `POST /index/sync[?force=true]` runs a resync and reports what it did.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use serde::{Deserialize, Serialize};
use statreg_core::{
  document::{SearchPage, SearchQuery},
  hooks::ValidationHook,
  index::SearchIndexClient,
  store::UnitStore,
};
use statreg_engine::{Registry, SyncReport};

use crate::error::ApiError;

/// `GET /search`
pub async fn handler<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Query(query): Query<SearchQuery>,
) -> Result<Json<SearchPage>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  Ok(Json(registry.search(&query).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
  #[serde(default)]
  pub force: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum SyncBody {
  InSync,
  Coalesced,
  Rebuilt { documents: u64 },
}

impl From<SyncReport> for SyncBody {
  fn from(report: SyncReport) -> Self {
    match report {
      SyncReport::InSync => SyncBody::InSync,
      SyncReport::Coalesced => SyncBody::Coalesced,
      SyncReport::Rebuilt { documents } => SyncBody::Rebuilt { documents },
    }
  }
}

/// `POST /index/sync[?force=true]`
pub async fn sync<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Query(params): Query<SyncParams>,
) -> Result<Json<SyncBody>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  let report = registry.synchronize(params.force).await?;
  Ok(Json(report.into()))
}
