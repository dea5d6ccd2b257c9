//! Identifier types: surrogate row ids, unit keys, and ordered id sets.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::unit::UnitKind;

// ─── RegId ───────────────────────────────────────────────────────────────────

/// Surrogate identity of one stored row (live or history).
///
/// Every `RegId` is handed out by [`crate::store::UnitStore::allocate_id`];
/// the live row of an entity keeps its id across edits while each history row
/// receives a fresh one.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegId(pub i64);

impl RegId {
  /// Placeholder carried by a proposed unit before the store assigns an id.
  pub const UNASSIGNED: RegId = RegId(0);

  pub fn is_assigned(self) -> bool { self.0 > 0 }
}

impl Default for RegId {
  fn default() -> Self { RegId::UNASSIGNED }
}

impl fmt::Display for RegId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<i64> for RegId {
  fn from(v: i64) -> Self { RegId(v) }
}

// ─── UnitKey ─────────────────────────────────────────────────────────────────

/// A row address: the variant plus its surrogate id. Doubles as the search
/// mirror's document id.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UnitKey {
  pub kind:   UnitKind,
  pub reg_id: RegId,
}

impl UnitKey {
  pub fn new(kind: UnitKind, reg_id: RegId) -> Self { Self { kind, reg_id } }

  /// Stable textual form used as the mirror document id, e.g. `legal_unit-42`.
  pub fn document_id(&self) -> String { format!("{}-{}", self.kind, self.reg_id) }
}

impl fmt::Display for UnitKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.kind, self.reg_id)
  }
}

// ─── IdSet ───────────────────────────────────────────────────────────────────

/// Ordered set of row ids; the in-memory form of a reverse-multiplicity cache
/// such as a legal unit's list of local units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSet(BTreeSet<RegId>);

impl IdSet {
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, id: RegId) -> bool { self.0.insert(id) }

  pub fn remove(&mut self, id: RegId) -> bool { self.0.remove(&id) }

  pub fn contains(&self, id: RegId) -> bool { self.0.contains(&id) }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = RegId> + '_ {
    self.0.iter().copied()
  }

  /// Ids present in exactly one of the two sets: `(self ∪ other) \ (self ∩ other)`.
  pub fn symmetric_difference(&self, other: &IdSet) -> Vec<RegId> {
    self.0.symmetric_difference(&other.0).copied().collect()
  }

  /// Ids in `self` but not in `other`.
  pub fn difference(&self, other: &IdSet) -> Vec<RegId> {
    self.0.difference(&other.0).copied().collect()
  }
}

impl FromIterator<RegId> for IdSet {
  fn from_iter<T: IntoIterator<Item = RegId>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

impl<const N: usize> From<[i64; N]> for IdSet {
  fn from(ids: [i64; N]) -> Self { ids.into_iter().map(RegId).collect() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn symmetric_difference_excludes_shared_members() {
    let old = IdSet::from([1, 2]);
    let new = IdSet::from([2, 3]);
    assert_eq!(old.symmetric_difference(&new), vec![RegId(1), RegId(3)]);
    assert_eq!(old.difference(&new), vec![RegId(1)]);
    assert_eq!(new.difference(&old), vec![RegId(3)]);
  }

  #[test]
  fn document_id_is_kind_and_id() {
    let key = UnitKey::new(UnitKind::LegalUnit, RegId(42));
    assert_eq!(key.document_id(), "legal_unit-42");
  }
}
