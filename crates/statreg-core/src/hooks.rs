//! Boundary contracts supplied by the surrounding application: the validation
//! hook and the acting identity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator as _;
use uuid::Uuid;

use crate::unit::{Unit, UnitKind};

// ─── Validation ──────────────────────────────────────────────────────────────

/// Field name to error messages. Empty means the unit is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
  pub fn new() -> Self { Self::default() }

  pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.0.entry(field.into()).or_default().push(message.into());
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn get(&self, field: &str) -> Option<&[String]> {
    self.0.get(field).map(Vec::as_slice)
  }

  pub fn fields(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
}

impl std::fmt::Display for FieldErrors {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let fields: Vec<&str> = self.fields().collect();
    write!(f, "invalid fields: {}", fields.join(", "))
  }
}

/// Externally supplied analysis of a proposed unit. The engine treats it as
/// an opaque predicate.
pub trait ValidationHook: Send + Sync {
  fn validate(&self, unit: &Unit) -> FieldErrors;
}

/// A hook that accepts every unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl ValidationHook for AcceptAll {
  fn validate(&self, _unit: &Unit) -> FieldErrors { FieldErrors::new() }
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// The acting user and the unit kinds they may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
  pub user_id:  Uuid,
  pub writable: BTreeSet<UnitKind>,
}

impl IdentityContext {
  pub fn new(user_id: Uuid, writable: impl IntoIterator<Item = UnitKind>) -> Self {
    Self { user_id, writable: writable.into_iter().collect() }
  }

  /// An identity allowed to write every kind, e.g. a bulk-import system user.
  pub fn system(user_id: Uuid) -> Self { Self::new(user_id, UnitKind::iter()) }

  pub fn can_write(&self, kind: UnitKind) -> bool { self.writable.contains(&kind) }
}
