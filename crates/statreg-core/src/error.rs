//! Error types for `statreg-core`.

use thiserror::Error;

use crate::{ids::RegId, unit::UnitKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0} has no upward hierarchy link")]
  NoUpwardLink(UnitKind),

  #[error("{0} has no child list")]
  NoChildList(UnitKind),

  #[error("row {0} is not a history row")]
  NotHistorical(RegId),

  #[error("history chain broken at row {0}")]
  BrokenChain(RegId),

  #[error("unknown unit kind: {0:?}")]
  UnknownKind(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
