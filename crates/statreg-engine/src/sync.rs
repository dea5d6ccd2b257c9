//! Keeping the search mirror consistent with the store.
//!
//! Incremental writes are best effort: a failure is logged, the write is
//! dropped, and a full resync is scheduled. A resync compares cardinalities
//! first and rebuilds only when they differ (or a resync was scheduled or
//! forced). At most one rebuild runs at a time per synchronizer.

use std::sync::{
  Arc,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use statreg_core::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  ids::RegId,
  index::SearchIndexClient,
  store::{UnitFilter, UnitStore},
  unit::{Unit, UnitKind},
};
use strum::IntoEnumIterator as _;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Stage, SyncError};

/// What a call to [`SearchIndexSynchronizer::synchronize`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReport {
  /// Counts matched and no resync was pending.
  InSync,
  /// Another caller finished a rebuild while this one waited.
  Coalesced,
  /// The mirror was dropped and rebuilt with this many documents.
  Rebuilt { documents: u64 },
}

/// Owner of the mirror's consistency state. Construct one per store/index
/// pair and share it behind an `Arc`.
pub struct SearchIndexSynchronizer<S, I> {
  store:      Arc<S>,
  index:      Arc<I>,
  batch_size: usize,
  /// Held for the whole of a resync.
  gate:       Mutex<()>,
  /// Incremented after every completed rebuild.
  generation: AtomicU64,
  /// Set when an incremental write was dropped.
  pending:    AtomicBool,
  rebuilds:   AtomicU64,
}

impl<S, I> SearchIndexSynchronizer<S, I>
where
  S: UnitStore,
  I: SearchIndexClient,
{
  pub fn new(store: Arc<S>, index: Arc<I>, batch_size: usize) -> Self {
    Self {
      store,
      index,
      batch_size: batch_size.max(1),
      gate: Mutex::new(()),
      generation: AtomicU64::new(0),
      pending: AtomicBool::new(false),
      rebuilds: AtomicU64::new(0),
    }
  }

  pub fn index(&self) -> &Arc<I> { &self.index }

  /// Number of full rebuilds performed so far.
  pub fn rebuild_count(&self) -> u64 { self.rebuilds.load(Ordering::Acquire) }

  /// Whether a dropped incremental write is waiting for a resync.
  pub fn is_resync_pending(&self) -> bool { self.pending.load(Ordering::Acquire) }

  /// Mark the mirror as stale; the next [`Self::synchronize`] rebuilds it.
  pub fn schedule_resync(&self) { self.pending.store(true, Ordering::Release); }

  // ── Incremental ────────────────────────────────────────────────────────

  /// Mirror the current state of `unit`: upsert its document, or remove it
  /// if the unit is deleted or historical.
  pub async fn upsert(&self, unit: &Unit) {
    let result = match ElasticDocument::from_unit(unit) {
      Some(doc) => self.index.upsert(doc).await,
      None => self.index.delete(unit.key()).await,
    };
    if let Err(e) = result {
      warn!(stage = %Stage::IndexSync, unit = %unit.key(), error = %e, "index write failed; resync scheduled");
      self.schedule_resync();
    }
  }

  // ── Resync ─────────────────────────────────────────────────────────────

  /// Bring the mirror in line with the store.
  ///
  /// Unless `force` is set or a resync is pending, compares the number of
  /// live units with the number of documents and returns early when they
  /// match. Concurrent callers serialise on one gate; a caller that waited
  /// while another rebuild completed returns [`SyncReport::Coalesced`].
  pub async fn synchronize(&self, force: bool) -> Result<SyncReport, SyncError> {
    let seen = self.generation.load(Ordering::Acquire);
    let _guard = self.gate.lock().await;
    if self.generation.load(Ordering::Acquire) != seen {
      return Ok(SyncReport::Coalesced);
    }

    if !self.index.ping().await {
      self.schedule_resync();
      return Err(SyncError::Unreachable);
    }

    let force = force || self.is_resync_pending();
    if !force {
      let stored = self.store.count_live().await.map_err(|e| SyncError::Store(Box::new(e)))?;
      let indexed = self.index.count().await.map_err(|e| SyncError::Index(Box::new(e)))?;
      if stored == indexed {
        return Ok(SyncReport::InSync);
      }
      info!(stored, indexed, "mirror count drift detected");
    }

    self.pending.store(false, Ordering::Release);
    match self.rebuild().await {
      Ok(documents) => {
        self.rebuilds.fetch_add(1, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(documents, "mirror rebuilt");
        Ok(SyncReport::Rebuilt { documents })
      }
      Err(e) => {
        self.schedule_resync();
        warn!(error = %e, "mirror rebuild failed");
        Err(e)
      }
    }
  }

  /// Drop the mirror and stream every live, non-deleted unit back into it in
  /// batches of `batch_size`.
  async fn rebuild(&self) -> Result<u64, SyncError> {
    self.index.delete_all().await.map_err(|e| SyncError::Index(Box::new(e)))?;

    let mut documents = 0;
    for kind in UnitKind::iter() {
      let mut after: Option<RegId> = None;
      loop {
        let filter = UnitFilter::live().page(after, self.batch_size);
        let page = self
          .store
          .query(kind, &filter)
          .await
          .map_err(|e| SyncError::Store(Box::new(e)))?;
        let Some(last) = page.last() else { break };
        after = Some(last.reg_id());
        let full = page.len() == self.batch_size;

        let docs: Vec<ElasticDocument> = page.iter().filter_map(ElasticDocument::from_unit).collect();
        documents += docs.len() as u64;
        if !docs.is_empty() {
          self.index.bulk_upsert(docs).await.map_err(|e| SyncError::Index(Box::new(e)))?;
        }
        if !full {
          break;
        }
      }
    }
    Ok(documents)
  }

  // ── Read path ──────────────────────────────────────────────────────────

  /// Run `query` against the mirror after a non-forced resync, so a stale or
  /// never-built mirror heals on first use.
  pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SyncError> {
    self.synchronize(false).await?;
    self.index.search(query).await.map_err(|e| SyncError::Index(Box::new(e)))
  }
}
