//! The change transaction: one create, edit, delete or restore applied as a
//! single atomic store write.
//!
//! Every change runs the same pipeline: authorize, validate, check business
//! rules, propagate to related units, snapshot every changed unit, persist
//! the whole write list in one commit, and finally mirror the new live rows
//! into the search index. Everything before persist is in memory; an error
//! there leaves the store untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use statreg_core::{
  document::{SearchPage, SearchQuery},
  history::{self, HistorySnapshot},
  hooks::{AcceptAll, IdentityContext, ValidationHook},
  ids::{RegId, UnitKey},
  index::SearchIndexClient,
  store::{UnitFilter, UnitStore, WriteBatch},
  unit::{ChangeReason, Unit, UnitKind, open_period},
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
  bulk::BulkHistoryBuffer,
  config::EngineConfig,
  error::{ChangeError, Result, Stage, SyncError},
  propagate::{ChangeSet, RelationshipPropagator, Touched},
  rules,
  sync::{SearchIndexSynchronizer, SyncReport},
};

// ─── Request / outcome ───────────────────────────────────────────────────────

/// A proposed unit state plus the change metadata.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
  pub unit:    Unit,
  pub comment: Option<String>,
  /// Change timestamp; defaults to now. Clamped to be later than the current
  /// version of every unit the change touches.
  pub as_of:   Option<DateTime<Utc>>,
}

impl ChangeRequest {
  pub fn new(unit: Unit) -> Self { Self { unit, comment: None, as_of: None } }

  pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
    self.comment = Some(comment.into());
    self
  }

  pub fn at(mut self, as_of: DateTime<Utc>) -> Self {
    self.as_of = Some(as_of);
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
  Committed,
  /// The proposal matched the stored state; nothing was written.
  Unchanged,
}

#[derive(Debug, Clone)]
pub struct ChangeOutcome {
  pub state:      ChangeState,
  /// The primary unit's live state after the change.
  pub unit:       Unit,
  /// Ids of every history row written, primary and collateral.
  pub history:    Vec<RegId>,
  /// Other units that were historized and updated.
  pub collateral: Vec<UnitKey>,
}

impl ChangeOutcome {
  fn unchanged(unit: Unit) -> Self {
    Self { state: ChangeState::Unchanged, unit, history: Vec::new(), collateral: Vec::new() }
  }
}

/// Who, why and when, applied to every row a change writes.
struct Stamp {
  user_id:   Uuid,
  reason:    ChangeReason,
  comment:   Option<String>,
  requested: DateTime<Utc>,
}

impl Stamp {
  fn reason_for(&self, primary: bool) -> ChangeReason {
    match self.reason {
      ChangeReason::Create if !primary => ChangeReason::Edit,
      reason => reason,
    }
  }
}

/// Where history rows go.
enum Sink<'b> {
  /// Into the same commit as the live rows.
  Immediate,
  /// Into a bulk buffer, after the live rows commit.
  Buffered(&'b mut BulkHistoryBuffer),
}

/// The write list of a change, ready to persist.
struct Staged {
  writes:  WriteBatch,
  history: Vec<HistorySnapshot>,
  live:    Vec<Unit>,
  primary: Unit,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Entry point for every change to the register.
pub struct Registry<S, I, V = AcceptAll> {
  store:     Arc<S>,
  sync:      Arc<SearchIndexSynchronizer<S, I>>,
  validator: V,
  config:    EngineConfig,
}

impl<S, I, V> Registry<S, I, V>
where
  S: UnitStore,
  I: SearchIndexClient,
  V: ValidationHook,
{
  pub fn new(store: Arc<S>, index: Arc<I>, validator: V, config: EngineConfig) -> Self {
    let sync = Arc::new(SearchIndexSynchronizer::new(
      store.clone(),
      index,
      config.resync_batch_size,
    ));
    Self { store, sync, validator, config }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn synchronizer(&self) -> &Arc<SearchIndexSynchronizer<S, I>> { &self.sync }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ── Changes ────────────────────────────────────────────────────────────

  /// Create a unit. A fresh `RegId` is allocated; any id on the proposal is
  /// ignored.
  pub async fn create(&self, who: &IdentityContext, request: ChangeRequest) -> Result<ChangeOutcome> {
    self.create_into(who, request, Sink::Immediate).await
  }

  /// [`Self::create`] with history rows deferred into `buffer`.
  pub async fn create_buffered(
    &self,
    who: &IdentityContext,
    request: ChangeRequest,
    buffer: &mut BulkHistoryBuffer,
  ) -> Result<ChangeOutcome> {
    self.create_into(who, request, Sink::Buffered(buffer)).await
  }

  /// Edit the live unit addressed by the proposal's kind and `reg_id`.
  pub async fn edit(&self, who: &IdentityContext, request: ChangeRequest) -> Result<ChangeOutcome> {
    self.edit_into(who, request, Sink::Immediate).await
  }

  /// [`Self::edit`] with history rows deferred into `buffer`.
  pub async fn edit_buffered(
    &self,
    who: &IdentityContext,
    request: ChangeRequest,
    buffer: &mut BulkHistoryBuffer,
  ) -> Result<ChangeOutcome> {
    self.edit_into(who, request, Sink::Buffered(buffer)).await
  }

  /// Mark a unit deleted. The row stays live; its mirror document goes.
  pub async fn delete(
    &self,
    who: &IdentityContext,
    key: UnitKey,
    comment: Option<String>,
  ) -> Result<ChangeOutcome> {
    self.set_deleted(who, key, true, comment).await
  }

  /// Undo [`Self::delete`].
  pub async fn restore(
    &self,
    who: &IdentityContext,
    key: UnitKey,
    comment: Option<String>,
  ) -> Result<ChangeOutcome> {
    self.set_deleted(who, key, false, comment).await
  }

  #[instrument(skip_all, fields(user = %who.user_id, kind = %request.unit.kind()))]
  async fn create_into(
    &self,
    who: &IdentityContext,
    request: ChangeRequest,
    sink: Sink<'_>,
  ) -> Result<ChangeOutcome> {
    let ChangeRequest { unit: mut proposed, comment, as_of } = request;
    self.authorize(who, proposed.kind())?;

    let now = as_of.unwrap_or_else(Utc::now);
    {
      let c = proposed.common_mut();
      c.reg_id = RegId::UNASSIGNED;
      c.parent_id = None;
      c.is_deleted = false;
    }
    rules::normalize_liquidation(None, &mut proposed, now);
    self.validate(&proposed)?;

    rules::check_unique_stat_id(&*self.store, None, &proposed).await?;
    rules::check_links(&*self.store, None, &proposed).await?;

    let reg_id = self.store.allocate_id().await.map_err(ChangeError::persistence)?;
    proposed.common_mut().reg_id = reg_id;

    let stamp = Stamp { user_id: who.user_id, reason: ChangeReason::Create, comment, requested: now };
    self.run(ChangeSet::create(proposed), stamp, sink).await
  }

  #[instrument(skip_all, fields(user = %who.user_id, unit = %request.unit.key()))]
  async fn edit_into(
    &self,
    who: &IdentityContext,
    request: ChangeRequest,
    sink: Sink<'_>,
  ) -> Result<ChangeOutcome> {
    let ChangeRequest { unit: mut proposed, comment, as_of } = request;
    let key = proposed.key();
    self.authorize(who, key.kind)?;

    let before = rules::load_live(&*self.store, key).await?.ok_or(ChangeError::NotFound(key))?;
    {
      // Bookkeeping is owned by the engine, not the caller.
      let b = before.common();
      let c = proposed.common_mut();
      c.parent_id = None;
      c.start_period = b.start_period;
      c.end_period = b.end_period;
      c.is_deleted = b.is_deleted;
      c.change_reason = b.change_reason;
      c.edit_comment = b.edit_comment.clone();
      c.user_id = b.user_id;
    }

    rules::check_status_transition(&before, &proposed)?;
    let now = as_of.unwrap_or_else(Utc::now);
    rules::normalize_liquidation(Some(&before), &mut proposed, now);
    self.validate(&proposed)?;

    if proposed.same_content(&before) {
      debug!(stage = %Stage::Snapshot, "no changes; nothing to write");
      return Ok(ChangeOutcome::unchanged(before));
    }

    rules::check_unique_stat_id(&*self.store, Some(&before), &proposed).await?;
    rules::check_links(&*self.store, Some(&before), &proposed).await?;
    rules::check_liquidation_parent(&*self.store, Some(&before), &proposed).await?;

    let stamp = Stamp { user_id: who.user_id, reason: ChangeReason::Edit, comment, requested: now };
    self.run(ChangeSet::edit(before, proposed), stamp, sink).await
  }

  #[instrument(skip(self, who, comment), fields(user = %who.user_id))]
  async fn set_deleted(
    &self,
    who: &IdentityContext,
    key: UnitKey,
    deleted: bool,
    comment: Option<String>,
  ) -> Result<ChangeOutcome> {
    self.authorize(who, key.kind)?;
    let before = rules::load_live(&*self.store, key).await?.ok_or(ChangeError::NotFound(key))?;
    if before.is_deleted() == deleted {
      return Ok(ChangeOutcome::unchanged(before));
    }

    if deleted {
      rules::check_delete(&*self.store, &before).await?;
    } else {
      rules::check_restore(&*self.store, &before).await?;
    }

    let mut proposed = before.clone();
    proposed.common_mut().is_deleted = deleted;
    let reason = if deleted { ChangeReason::Delete } else { ChangeReason::Undelete };
    let stamp = Stamp { user_id: who.user_id, reason, comment, requested: Utc::now() };
    self.run(ChangeSet::edit(before, proposed), stamp, Sink::Immediate).await
  }

  // ── Pipeline ───────────────────────────────────────────────────────────

  fn authorize(&self, who: &IdentityContext, kind: UnitKind) -> Result<()> {
    if who.can_write(kind) {
      return Ok(());
    }
    warn!(stage = %Stage::Authorize, user = %who.user_id, %kind, "write permission denied");
    Err(ChangeError::Unauthorized { user: who.user_id, kind })
  }

  fn validate(&self, unit: &Unit) -> Result<()> {
    let errors = self.validator.validate(unit);
    if errors.is_empty() {
      return Ok(());
    }
    debug!(stage = %Stage::Validate, %errors, "proposal rejected");
    Err(ChangeError::Validation(errors))
  }

  async fn run(&self, mut set: ChangeSet, stamp: Stamp, sink: Sink<'_>) -> Result<ChangeOutcome> {
    let key = set.primary_key();

    debug!(stage = %Stage::Propagate, unit = %key);
    let collateral = RelationshipPropagator::new(&*self.store).propagate(&mut set).await?;

    debug!(stage = %Stage::Snapshot, unit = %key, collateral = collateral.len());
    let staged = self.stage(set, &stamp).await?;
    let history: Vec<RegId> = staged.history.iter().map(HistorySnapshot::reg_id).collect();

    self.persist(staged.writes, staged.history, sink).await?;
    info!(
      unit = %key,
      reason = %stamp.reason,
      history = history.len(),
      collateral = collateral.len(),
      "change committed"
    );

    for unit in &staged.live {
      self.sync.upsert(unit).await;
    }

    Ok(ChangeOutcome { state: ChangeState::Committed, unit: staged.primary, history, collateral })
  }

  /// Snapshot every changed unit at one shared timestamp and build the write
  /// list. Units the propagator loaded but did not change are dropped.
  async fn stage(&self, set: ChangeSet, stamp: &Stamp) -> Result<Staged> {
    let primary_key = set.primary_key();
    let entries: Vec<(UnitKey, Touched)> = set.into_units().filter(|(_, t)| t.is_changed()).collect();

    let as_of = entries
      .iter()
      .filter_map(|(_, t)| t.before.as_ref())
      .fold(stamp.requested, |at, b| history::change_timestamp(b.common().start_period, at));

    let mut writes = WriteBatch::new();
    let mut snapshots = Vec::new();
    let mut live = Vec::with_capacity(entries.len());
    let mut primary = None;

    for (key, Touched { before, mut current }) in entries {
      let is_primary = key == primary_key;
      {
        let c = current.common_mut();
        c.user_id = stamp.user_id;
        c.edit_comment = stamp.comment.clone();
        c.change_reason = stamp.reason_for(is_primary);
      }

      match before {
        None => {
          let c = current.common_mut();
          c.parent_id = None;
          c.start_period = as_of;
          c.end_period = open_period();
          writes.insert(current.clone());
        }
        Some(before) => {
          let history_id = self.store.allocate_id().await.map_err(ChangeError::persistence)?;
          snapshots.push(history::snapshot(&before, &mut current, history_id, as_of));
          writes.update(current.clone(), before.common().start_period);
        }
      }

      if is_primary {
        primary = Some(current.clone());
      }
      live.push(current);
    }

    let primary = primary
      .ok_or_else(|| ChangeError::Invariant(format!("primary unit {primary_key} produced no write")))?;
    Ok(Staged { writes, history: snapshots, live, primary })
  }

  async fn persist(
    &self,
    mut writes: WriteBatch,
    history: Vec<HistorySnapshot>,
    sink: Sink<'_>,
  ) -> Result<()> {
    let buffer = match sink {
      Sink::Immediate => {
        for snap in history.iter().cloned() {
          writes.insert_history(snap);
        }
        None
      }
      Sink::Buffered(buffer) => Some(buffer),
    };

    if let Err(e) = self.store.commit(writes).await {
      error!(stage = %Stage::Persist, error = %e, "commit failed; change aborted");
      return Err(ChangeError::persistence(e));
    }

    if let Some(buffer) = buffer {
      for snap in history {
        buffer.add_to_history_buffer(snap);
      }
    }
    Ok(())
  }

  // ── Reads ──────────────────────────────────────────────────────────────

  /// Point lookup of a live or history row.
  pub async fn get(&self, key: UnitKey) -> Result<Unit> {
    self
      .store
      .get(key)
      .await
      .map_err(ChangeError::persistence)?
      .ok_or(ChangeError::NotFound(key))
  }

  /// The live row with this stat id, deleted or not.
  pub async fn find_live(&self, kind: UnitKind, stat_id: &str) -> Result<Option<Unit>> {
    let filter = UnitFilter::live_with_deleted().with_stat_id(stat_id);
    let mut rows = self.store.query(kind, &filter).await.map_err(ChangeError::persistence)?;
    Ok(rows.pop())
  }

  /// History rows of a live unit, newest first.
  pub async fn history(&self, key: UnitKey) -> Result<Vec<HistorySnapshot>> {
    let live = self.get(key).await?;
    if !live.is_live() {
      return Err(ChangeError::NotFound(key));
    }
    let rows = self
      .store
      .query(key.kind, &UnitFilter::history_of(key.reg_id))
      .await
      .map_err(ChangeError::persistence)?;
    let mut snapshots = rows
      .into_iter()
      .map(HistorySnapshot::from_stored)
      .collect::<Result<Vec<_>, _>>()?;
    snapshots.sort_by(|a, b| b.end_period().cmp(&a.end_period()));
    Ok(snapshots)
  }

  /// Check that a unit's history chain is contiguous.
  pub async fn verify_history(&self, key: UnitKey) -> Result<usize> {
    let live = self.get(key).await?;
    let snapshots = self.history(key).await?;
    history::verify_chain(&live, &snapshots)?;
    Ok(snapshots.len())
  }

  pub async fn search(&self, query: &SearchQuery) -> Result<SearchPage, SyncError> {
    self.sync.search(query).await
  }

  pub async fn synchronize(&self, force: bool) -> Result<SyncReport, SyncError> {
    self.sync.synchronize(force).await
  }

  /// Write out a bulk buffer. Returns the number of history rows written.
  pub async fn flush(&self, buffer: &mut BulkHistoryBuffer) -> Result<usize> {
    buffer.flush(&*self.store).await.map_err(|e| {
      error!(stage = %Stage::Persist, error = %e, "history flush failed");
      ChangeError::persistence(e)
    })
  }
}
