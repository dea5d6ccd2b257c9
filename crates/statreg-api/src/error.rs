//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use statreg_engine::{ChangeError, SyncError};
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unauthenticated: {0}")]
  Unauthenticated(String),

  #[error(transparent)]
  Change(#[from] ChangeError),

  #[error(transparent)]
  Sync(#[from] SyncError),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, body) = match &self {
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, json!({ "error": m })),
      ApiError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, json!({ "error": m })),
      ApiError::Change(ChangeError::Validation(fields)) => (
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "error": "validation failed", "fields": fields }),
      ),
      ApiError::Change(ChangeError::BusinessRule(rule)) => {
        (StatusCode::CONFLICT, json!({ "error": rule.to_string() }))
      }
      ApiError::Change(e @ ChangeError::Unauthorized { .. }) => {
        (StatusCode::FORBIDDEN, json!({ "error": e.to_string() }))
      }
      ApiError::Change(e @ ChangeError::NotFound(_)) => {
        (StatusCode::NOT_FOUND, json!({ "error": e.to_string() }))
      }
      ApiError::Change(ChangeError::Persistence(e)) => {
        error!(error = %e, "store failure");
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "save failed" }))
      }
      ApiError::Change(e @ ChangeError::Invariant(_)) => {
        error!(error = %e, "engine invariant violated");
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "internal error" }))
      }
      ApiError::Sync(e @ SyncError::Unreachable) => {
        (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": e.to_string() }))
      }
      ApiError::Sync(e) => {
        error!(error = %e, "search mirror failure");
        (StatusCode::BAD_GATEWAY, json!({ "error": e.to_string() }))
      }
    };
    (status, Json(body)).into_response()
  }
}
