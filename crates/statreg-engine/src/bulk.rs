//! Deferred history writes for bulk import passes.

use std::collections::BTreeMap;

use statreg_core::{
  history::HistorySnapshot,
  store::{UnitStore, WriteBatch},
  unit::UnitKind,
};

/// Accumulates history snapshots in memory, grouped by kind, so a bulk pass
/// issues one insert batch per kind instead of one write per row.
///
/// A buffer belongs to exactly one bulk pass. It is not shared: every method
/// that changes it takes `&mut self`.
#[derive(Debug, Default)]
pub struct BulkHistoryBuffer {
  groups: BTreeMap<UnitKind, Vec<HistorySnapshot>>,
}

impl BulkHistoryBuffer {
  pub fn new() -> Self { Self::default() }

  /// Queue one snapshot. Order within a kind is preserved.
  pub fn add_to_history_buffer(&mut self, snapshot: HistorySnapshot) {
    self.groups.entry(snapshot.kind()).or_default().push(snapshot);
  }

  pub fn len(&self) -> usize { self.groups.values().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  pub fn should_flush(&self, threshold: usize) -> bool { self.len() >= threshold.max(1) }

  /// Write every queued snapshot, one commit per kind. Groups that were
  /// committed are removed; on failure the failed group and everything after
  /// it stay queued. Returns the number of rows written.
  pub async fn flush<S: UnitStore>(&mut self, store: &S) -> Result<usize, S::Error> {
    let mut written = 0;
    let kinds: Vec<UnitKind> = self.groups.keys().copied().collect();
    for kind in kinds {
      let Some(rows) = self.groups.remove(&kind) else { continue };
      let count = rows.len();
      let batch: WriteBatch = rows
        .iter()
        .cloned()
        .map(statreg_core::store::Write::InsertHistory)
        .collect();
      if let Err(e) = store.commit(batch).await {
        self.groups.insert(kind, rows);
        return Err(e);
      }
      tracing::debug!(%kind, rows = count, "flushed history buffer group");
      written += count;
    }
    Ok(written)
  }
}
