//! Error types for `statreg-index-elastic`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http transport: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{op} returned {status}: {body}")]
  Status { op: &'static str, status: reqwest::StatusCode, body: String },

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("bulk request rejected {0} document(s)")]
  BulkRejected(usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
