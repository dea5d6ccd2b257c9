//! Error types for `statreg-engine`.

use statreg_core::{
  hooks::FieldErrors,
  ids::UnitKey,
  unit::UnitKind,
};
use strum::Display;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline stage of a change, carried on log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
  Authorize,
  Validate,
  Snapshot,
  Propagate,
  Persist,
  IndexSync,
}

// ─── Business rules ──────────────────────────────────────────────────────────

/// A change that is well-formed but not allowed by register policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessRule {
  #[error("{0} is liquidated; its status cannot change")]
  UnitHasLiquidated(UnitKey),

  #[error("{child} is the last active member of {parent}; liquidate {parent} instead")]
  LiquidateParentInstead { child: UnitKey, parent: UnitKey },

  #[error("{from} cannot link to {to}: not a live, non-deleted unit")]
  InvalidLink { from: UnitKind, to: UnitKey },

  #[error("a live {kind} with stat id {stat_id:?} already exists")]
  DuplicateStatId { kind: UnitKind, stat_id: String },

  #[error("{child} is the last member of {parent}")]
  LastChild { child: UnitKey, parent: UnitKey },

  #[error("{0} still has active members")]
  HasActiveChildren(UnitKey),

  #[error("{parent} is deleted")]
  ParentDeleted { parent: UnitKey },

  #[error("{0} still has deleted members; restore them first")]
  HasDeletedChildren(UnitKey),
}

// ─── Change errors ───────────────────────────────────────────────────────────

/// Why a change was aborted. Nothing is written in any of these cases.
#[derive(Debug, Error)]
pub enum ChangeError {
  #[error("{0}")]
  Validation(FieldErrors),

  #[error("{0}")]
  BusinessRule(#[from] BusinessRule),

  /// The store failed to read or commit. The cause is kept for operators.
  #[error("save failed: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("user {user} may not write {kind}")]
  Unauthorized { user: Uuid, kind: UnitKind },

  #[error("unit not found: {0}")]
  NotFound(UnitKey),

  /// A programming error in snapshot or propagation. Never retried.
  #[error("invariant violated: {0}")]
  Invariant(String),
}

impl ChangeError {
  pub fn persistence<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence(Box::new(err))
  }
}

impl From<statreg_core::Error> for ChangeError {
  fn from(err: statreg_core::Error) -> Self { Self::Invariant(err.to_string()) }
}

pub type Result<T, E = ChangeError> = std::result::Result<T, E>;

// ─── Sync errors ─────────────────────────────────────────────────────────────

/// Failures of the search mirror. Never abort a committed change.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("search index unreachable")]
  Unreachable,

  #[error("index error: {0}")]
  Index(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}
