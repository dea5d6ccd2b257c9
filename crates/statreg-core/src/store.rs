//! The `UnitStore` trait and supporting query and write types.
//!
//! The trait is implemented by storage backends (e.g. `statreg-store-sqlite`).
//! The change engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  history::HistorySnapshot,
  ids::{RegId, UnitKey},
  unit::{Unit, UnitKind},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`UnitStore::query`]. Results are ordered by `reg_id`
/// ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFilter {
  /// Only rows with `parent_id = NULL`.
  pub live_only:       bool,
  /// Include rows with `is_deleted` set. Ignored for history queries.
  pub include_deleted: bool,
  pub stat_id:         Option<String>,
  /// Only history rows superseded by this live row.
  pub history_of:      Option<RegId>,
  /// Only rows whose upward hierarchy link points at this id.
  pub upward:          Option<RegId>,
  /// Keyset pagination: only rows with `reg_id > after`.
  pub after:           Option<RegId>,
  pub limit:           Option<usize>,
}

impl UnitFilter {
  /// Live, non-deleted rows.
  pub fn live() -> Self { Self { live_only: true, ..Self::default() } }

  /// Live rows including deleted ones.
  pub fn live_with_deleted() -> Self {
    Self { live_only: true, include_deleted: true, ..Self::default() }
  }

  /// History rows of one entity.
  pub fn history_of(live: RegId) -> Self {
    Self { history_of: Some(live), include_deleted: true, ..Self::default() }
  }

  pub fn with_stat_id(mut self, stat_id: impl Into<String>) -> Self {
    self.stat_id = Some(stat_id.into());
    self
  }

  pub fn with_upward(mut self, parent: RegId) -> Self {
    self.upward = Some(parent);
    self
  }

  pub fn page(mut self, after: Option<RegId>, limit: usize) -> Self {
    self.after = after;
    self.limit = Some(limit);
    self
  }
}

// ─── Write batch ─────────────────────────────────────────────────────────────

/// One row write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
  /// Append a history row. History rows are never updated afterwards.
  InsertHistory(HistorySnapshot),
  /// Insert a new live row.
  Insert(Unit),
  /// Overwrite an existing live row, keyed by its `reg_id`, provided its
  /// stored `start_period` still equals `expected`. A mismatch means another
  /// change committed in between and fails the whole batch.
  Update { unit: Unit, expected: DateTime<Utc> },
}

/// The full write list of one change, applied atomically by
/// [`UnitStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
  writes: Vec<Write>,
}

impl WriteBatch {
  pub fn new() -> Self { Self::default() }

  pub fn insert_history(&mut self, snapshot: HistorySnapshot) {
    self.writes.push(Write::InsertHistory(snapshot));
  }

  pub fn insert(&mut self, unit: Unit) { self.writes.push(Write::Insert(unit)); }

  /// Queue an update of `unit`, read when its `start_period` was `expected`.
  pub fn update(&mut self, unit: Unit, expected: DateTime<Utc>) {
    self.writes.push(Write::Update { unit, expected });
  }

  pub fn len(&self) -> usize { self.writes.len() }

  pub fn is_empty(&self) -> bool { self.writes.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &Write> { self.writes.iter() }

  /// Number of history rows in the batch.
  pub fn history_len(&self) -> usize {
    self.writes.iter().filter(|w| matches!(w, Write::InsertHistory(_))).count()
  }
}

impl IntoIterator for WriteBatch {
  type Item = Write;
  type IntoIter = std::vec::IntoIter<Write>;

  fn into_iter(self) -> Self::IntoIter { self.writes.into_iter() }
}

impl FromIterator<Write> for WriteBatch {
  fn from_iter<T: IntoIterator<Item = Write>>(iter: T) -> Self {
    Self { writes: iter.into_iter().collect() }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the authoritative unit store.
///
/// Implementations must apply a [`WriteBatch`] atomically: either every write
/// becomes visible or none does. An update whose expected version no longer
/// matches the stored row fails the batch.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait UnitStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Hand out a fresh `RegId`, unique across all rows of all kinds. Ids
  /// allocated for a batch that later aborts are simply never used.
  fn allocate_id(&self) -> impl Future<Output = Result<RegId, Self::Error>> + Send + '_;

  /// Point lookup of a live or history row.
  fn get(
    &self,
    key: UnitKey,
  ) -> impl Future<Output = Result<Option<Unit>, Self::Error>> + Send + '_;

  /// Range/filter query over one kind.
  fn query<'a>(
    &'a self,
    kind: UnitKind,
    filter: &'a UnitFilter,
  ) -> impl Future<Output = Result<Vec<Unit>, Self::Error>> + Send + 'a;

  /// Number of live, non-deleted rows across all kinds. This is the
  /// cardinality the search mirror is compared against.
  fn count_live(&self) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  /// Apply every write in one store transaction.
  fn commit(
    &self,
    batch: WriteBatch,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
