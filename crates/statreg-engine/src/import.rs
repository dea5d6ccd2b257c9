//! The bulk import driver: feeds already-mapped rows through the change
//! pipeline with history writes buffered.

use statreg_core::{
  hooks::{IdentityContext, ValidationHook},
  index::SearchIndexClient,
  store::UnitStore,
  unit::{Unit, UnitKind},
};
use tracing::{info, warn};

use crate::{
  bulk::BulkHistoryBuffer,
  error::Result,
  transaction::{ChangeRequest, ChangeState, Registry},
};

/// One row that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
  /// One-based position in the feed.
  pub row:     usize,
  pub kind:    UnitKind,
  pub stat_id: String,
  pub error:   String,
}

/// Totals of a finished import pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
  pub created:      usize,
  pub edited:       usize,
  pub unchanged:    usize,
  pub history_rows: usize,
  pub failed:       Vec<RowFailure>,
}

impl ImportSummary {
  pub fn rows(&self) -> usize { self.created + self.edited + self.unchanged + self.failed.len() }
}

/// A single bulk pass. Owns its [`BulkHistoryBuffer`]; history is flushed
/// whenever the buffer reaches the configured threshold and once more in
/// [`BulkImport::finish`].
pub struct BulkImport<'r, S, I, V> {
  registry:  &'r Registry<S, I, V>,
  who:       IdentityContext,
  buffer:    BulkHistoryBuffer,
  threshold: usize,
  summary:   ImportSummary,
}

impl<'r, S, I, V> BulkImport<'r, S, I, V>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  pub fn new(registry: &'r Registry<S, I, V>, who: IdentityContext) -> Self {
    let threshold = registry.config().bulk_flush_threshold;
    Self { registry, who, buffer: BulkHistoryBuffer::new(), threshold, summary: ImportSummary::default() }
  }

  /// Apply one row: edit the live unit with the same stat id and kind if
  /// there is one, create it otherwise. A row that lists no members keeps
  /// the stored member list. Row failures are recorded, not returned; only a
  /// failed history flush aborts the pass.
  pub async fn push(&mut self, unit: Unit) -> Result<()> {
    let row = self.summary.rows() + 1;
    let kind = unit.kind();
    let stat_id = unit.common().stat_id.clone();

    match self.apply(unit).await {
      Ok((ChangeState::Unchanged, _)) => self.summary.unchanged += 1,
      Ok((ChangeState::Committed, true)) => self.summary.created += 1,
      Ok((ChangeState::Committed, false)) => self.summary.edited += 1,
      Err(e) => {
        warn!(row, %kind, stat_id = %stat_id, error = %e, "import row rejected");
        self.summary.failed.push(RowFailure { row, kind, stat_id, error: e.to_string() });
      }
    }

    if self.buffer.should_flush(self.threshold) {
      self.flush().await?;
    }
    Ok(())
  }

  async fn apply(&mut self, mut unit: Unit) -> Result<(ChangeState, bool)> {
    let existing = self.registry.find_live(unit.kind(), &unit.common().stat_id).await?;
    match existing {
      Some(existing) => {
        unit.common_mut().reg_id = existing.reg_id();
        if let (Some(stored), Ok(incoming)) = (existing.children(), unit.children_mut()) {
          if incoming.is_empty() {
            *incoming = stored.clone();
          }
        }
        let outcome = self
          .registry
          .edit_buffered(&self.who, ChangeRequest::new(unit), &mut self.buffer)
          .await?;
        Ok((outcome.state, false))
      }
      None => {
        let outcome = self
          .registry
          .create_buffered(&self.who, ChangeRequest::new(unit), &mut self.buffer)
          .await?;
        Ok((outcome.state, true))
      }
    }
  }

  async fn flush(&mut self) -> Result<()> {
    let written = self.registry.flush(&mut self.buffer).await?;
    self.summary.history_rows += written;
    Ok(())
  }

  /// Flush the remaining history and return the totals.
  pub async fn finish(mut self) -> Result<ImportSummary> {
    self.flush().await?;
    info!(
      created = self.summary.created,
      edited = self.summary.edited,
      unchanged = self.summary.unchanged,
      failed = self.summary.failed.len(),
      history_rows = self.summary.history_rows,
      "bulk import finished"
    );
    Ok(self.summary)
  }
}
