//! Handlers for `/units` endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/units` | Body: a unit, tagged by `kind`. 201 on success |
//! | `GET`    | `/units/{kind}/{id}` | Live or history row |
//! | `PUT`    | `/units/{kind}/{id}` | Body: the full proposed unit |
//! | `DELETE` | `/units/{kind}/{id}` | Marks deleted |
//! | `POST`   | `/units/{kind}/{id}/restore` | Undoes a delete |
//! | `GET`    | `/units/{kind}/{id}/history` | Newest first |
//!
//! Every change endpoint accepts `?comment=` and, except delete and restore,
//! `?as_of=` (RFC 3339).

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statreg_core::{
  history::HistorySnapshot,
  hooks::ValidationHook,
  ids::{RegId, UnitKey},
  index::SearchIndexClient,
  store::UnitStore,
  unit::{Unit, UnitKind},
};
use statreg_engine::{ChangeOutcome, ChangeRequest, ChangeState, Registry};

use crate::{error::ApiError, identity::Identity};

// ─── Shared types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ChangeParams {
  pub comment: Option<String>,
  pub as_of:   Option<DateTime<Utc>>,
}

impl ChangeParams {
  fn request(self, unit: Unit) -> ChangeRequest {
    ChangeRequest { unit, comment: self.comment, as_of: self.as_of }
  }
}

/// JSON form of a [`ChangeOutcome`].
#[derive(Debug, Serialize, Deserialize)]
pub struct OutcomeBody {
  pub committed:  bool,
  pub unit:       Unit,
  pub history:    Vec<RegId>,
  pub collateral: Vec<UnitKey>,
}

impl From<ChangeOutcome> for OutcomeBody {
  fn from(o: ChangeOutcome) -> Self {
    Self {
      committed:  o.state == ChangeState::Committed,
      unit:       o.unit,
      history:    o.history,
      collateral: o.collateral,
    }
  }
}

fn addressed(kind: UnitKind, id: i64) -> UnitKey { UnitKey::new(kind, RegId(id)) }

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /units`
pub async fn create<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Identity(who): Identity,
  Query(params): Query<ChangeParams>,
  Json(unit): Json<Unit>,
) -> Result<impl IntoResponse, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  let outcome = registry.create(&who, params.request(unit)).await?;
  Ok((StatusCode::CREATED, Json(OutcomeBody::from(outcome))))
}

// ─── Read ─────────────────────────────────────────────────────────────────────

/// `GET /units/{kind}/{id}`
pub async fn get_one<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Path((kind, id)): Path<(UnitKind, i64)>,
) -> Result<Json<Unit>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  Ok(Json(registry.get(addressed(kind, id)).await?))
}

/// `GET /units/{kind}/{id}/history`
pub async fn history<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Path((kind, id)): Path<(UnitKind, i64)>,
) -> Result<Json<Vec<HistorySnapshot>>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  Ok(Json(registry.history(addressed(kind, id)).await?))
}

// ─── Edit ─────────────────────────────────────────────────────────────────────

/// `PUT /units/{kind}/{id}`. The path addresses the unit; a body of another
/// kind is rejected and the body's id is ignored.
pub async fn update<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Identity(who): Identity,
  Path((kind, id)): Path<(UnitKind, i64)>,
  Query(params): Query<ChangeParams>,
  Json(mut unit): Json<Unit>,
) -> Result<Json<OutcomeBody>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  if unit.kind() != kind {
    return Err(ApiError::BadRequest(format!(
      "body is a {} but the path addresses a {kind}",
      unit.kind()
    )));
  }
  unit.common_mut().reg_id = RegId(id);
  let outcome = registry.edit(&who, params.request(unit)).await?;
  Ok(Json(outcome.into()))
}

// ─── Delete / restore ─────────────────────────────────────────────────────────

/// `DELETE /units/{kind}/{id}`
pub async fn delete<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Identity(who): Identity,
  Path((kind, id)): Path<(UnitKind, i64)>,
  Query(params): Query<ChangeParams>,
) -> Result<Json<OutcomeBody>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  let outcome = registry.delete(&who, addressed(kind, id), params.comment).await?;
  Ok(Json(outcome.into()))
}

/// `POST /units/{kind}/{id}/restore`
pub async fn restore<S, I, V>(
  State(registry): State<Arc<Registry<S, I, V>>>,
  Identity(who): Identity,
  Path((kind, id)): Path<(UnitKind, i64)>,
  Query(params): Query<ChangeParams>,
) -> Result<Json<OutcomeBody>, ApiError>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  let outcome = registry.restore(&who, addressed(kind, id), params.comment).await?;
  Ok(Json(outcome.into()))
}
