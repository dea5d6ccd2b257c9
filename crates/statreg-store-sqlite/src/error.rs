//! Error type for `statreg-store-sqlite`.

use statreg_core::ids::RegId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] statreg_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("malformed id list: {0:?}")]
  IdList(String),

  /// An update targeted a row that is missing, no longer live, or changed
  /// since it was read. The whole batch was rolled back.
  #[error("live row {0} is missing or was changed concurrently")]
  Stale(RegId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
