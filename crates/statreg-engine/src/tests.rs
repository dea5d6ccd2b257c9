use std::{
  sync::{
    Arc, Mutex as StdMutex,
    atomic::{AtomicBool, Ordering},
  },
  time::Duration,
};

use statreg_core::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  history,
  hooks::{AcceptAll, IdentityContext},
  ids::{IdSet, RegId, UnitKey},
  index::SearchIndexClient,
  store::{UnitFilter, UnitStore, WriteBatch},
  unit::{ChangeReason, Unit, UnitCommon, UnitKind, UnitStatus},
};
use statreg_store_sqlite::SqliteStore;
use tokio::sync::Barrier;
use uuid::Uuid;

use crate::{
  BulkHistoryBuffer, BulkImport, BusinessRule, ChangeError, ChangeOutcome, ChangeRequest,
  ChangeState, EngineConfig, MandatoryFields, Registry, SyncReport,
};

// ─── Test doubles ────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("index offline")]
struct Offline;

/// A [`MemoryIndex`](crate::MemoryIndex) that can be switched offline, slowed
/// down, and records every incremental upsert.
#[derive(Debug, Default)]
struct ProbeIndex {
  inner:   crate::MemoryIndex,
  offline: AtomicBool,
  delay:   Option<Duration>,
  upserts: StdMutex<Vec<String>>,
}

impl ProbeIndex {
  fn slow(delay: Duration) -> Self { Self { delay: Some(delay), ..Self::default() } }

  fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst); }

  fn take_upserts(&self) -> Vec<String> {
    let mut ids = std::mem::take(&mut *self.upserts.lock().unwrap());
    ids.sort();
    ids
  }

  fn check(&self) -> Result<(), Offline> {
    if self.offline.load(Ordering::SeqCst) { Err(Offline) } else { Ok(()) }
  }
}

impl SearchIndexClient for ProbeIndex {
  type Error = Offline;

  async fn upsert(&self, doc: ElasticDocument) -> Result<(), Offline> {
    self.check()?;
    self.upserts.lock().unwrap().push(doc.id.clone());
    self.inner.upsert(doc).await.map_err(|e| match e {})
  }

  async fn delete(&self, key: UnitKey) -> Result<(), Offline> {
    self.check()?;
    self.inner.delete(key).await.map_err(|e| match e {})
  }

  async fn bulk_upsert(&self, docs: Vec<ElasticDocument>) -> Result<(), Offline> {
    self.check()?;
    self.inner.bulk_upsert(docs).await.map_err(|e| match e {})
  }

  async fn delete_all(&self) -> Result<(), Offline> {
    self.check()?;
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    self.inner.delete_all().await.map_err(|e| match e {})
  }

  async fn count(&self) -> Result<u64, Offline> {
    self.check()?;
    self.inner.count().await.map_err(|e| match e {})
  }

  async fn ping(&self) -> bool { !self.offline.load(Ordering::SeqCst) }

  async fn search(&self, query: &SearchQuery) -> Result<SearchPage, Offline> {
    self.check()?;
    self.inner.search(query).await.map_err(|e| match e {})
  }
}

#[derive(Debug, thiserror::Error)]
enum StoreFault {
  #[error("injected commit failure")]
  Injected,
  #[error(transparent)]
  Sqlite(#[from] statreg_store_sqlite::Error),
}

/// A SQLite store whose commits can be made to fail.
struct FailingStore {
  inner:       SqliteStore,
  fail_commit: AtomicBool,
}

impl UnitStore for FailingStore {
  type Error = StoreFault;

  async fn allocate_id(&self) -> Result<RegId, StoreFault> { Ok(self.inner.allocate_id().await?) }

  async fn get(&self, key: UnitKey) -> Result<Option<Unit>, StoreFault> {
    Ok(self.inner.get(key).await?)
  }

  async fn query(&self, kind: UnitKind, filter: &UnitFilter) -> Result<Vec<Unit>, StoreFault> {
    Ok(self.inner.query(kind, filter).await?)
  }

  async fn count_live(&self) -> Result<u64, StoreFault> { Ok(self.inner.count_live().await?) }

  async fn commit(&self, batch: WriteBatch) -> Result<(), StoreFault> {
    if self.fail_commit.load(Ordering::SeqCst) {
      return Err(StoreFault::Injected);
    }
    Ok(self.inner.commit(batch).await?)
  }
}

/// A SQLite store that can hold commits until a number of changes have all
/// reached the commit step, so their reads are guaranteed to overlap.
struct GatedStore {
  inner: SqliteStore,
  gate:  StdMutex<Option<Arc<Barrier>>>,
}

impl GatedStore {
  async fn open() -> Self {
    Self { inner: SqliteStore::open_in_memory().await.unwrap(), gate: StdMutex::new(None) }
  }

  fn hold_commits(&self, parties: usize) {
    *self.gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
  }

  fn release(&self) { *self.gate.lock().unwrap() = None; }
}

impl UnitStore for GatedStore {
  type Error = statreg_store_sqlite::Error;

  async fn allocate_id(&self) -> Result<RegId, Self::Error> { self.inner.allocate_id().await }

  async fn get(&self, key: UnitKey) -> Result<Option<Unit>, Self::Error> {
    self.inner.get(key).await
  }

  async fn query(&self, kind: UnitKind, filter: &UnitFilter) -> Result<Vec<Unit>, Self::Error> {
    self.inner.query(kind, filter).await
  }

  async fn count_live(&self) -> Result<u64, Self::Error> { self.inner.count_live().await }

  async fn commit(&self, batch: WriteBatch) -> Result<(), Self::Error> {
    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.wait().await;
    }
    self.inner.commit(batch).await
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

type TestRegistry = Registry<SqliteStore, ProbeIndex>;

async fn registry_with(index: ProbeIndex, config: EngineConfig) -> (TestRegistry, Arc<ProbeIndex>) {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let index = Arc::new(index);
  (Registry::new(store, index.clone(), AcceptAll, config), index)
}

async fn registry() -> (TestRegistry, Arc<ProbeIndex>) {
  registry_with(ProbeIndex::default(), EngineConfig::default()).await
}

fn who() -> IdentityContext { IdentityContext::system(Uuid::from_u128(7)) }

fn common(stat_id: &str) -> UnitCommon { UnitCommon::new(stat_id, format!("Unit {stat_id}")) }

fn local(stat_id: &str, legal: Option<RegId>) -> Unit { Unit::local(common(stat_id), legal) }

fn legal(stat_id: &str, enterprise: Option<RegId>) -> Unit {
  Unit::legal(common(stat_id), enterprise, IdSet::new())
}

fn enterprise(stat_id: &str) -> Unit { Unit::enterprise(common(stat_id), None, IdSet::new()) }

async fn create(reg: &TestRegistry, unit: Unit) -> Unit {
  reg.create(&who(), ChangeRequest::new(unit)).await.unwrap().unit
}

async fn edit(reg: &TestRegistry, unit: Unit) -> ChangeOutcome {
  reg.edit(&who(), ChangeRequest::new(unit)).await.unwrap()
}

async fn current(reg: &TestRegistry, key: UnitKey) -> Unit { reg.get(key).await.unwrap() }

async fn history_len(reg: &TestRegistry, key: UnitKey) -> usize {
  reg.history(key).await.unwrap().len()
}

fn liquidate(mut unit: Unit, reason: &str) -> Unit {
  let c = unit.common_mut();
  c.status = UnitStatus::Liquidated;
  c.liq_reason = Some(reason.to_owned());
  unit
}

fn sorted(mut keys: Vec<UnitKey>) -> Vec<UnitKey> {
  keys.sort();
  keys
}

// ─── Creation and history ────────────────────────────────────────────────────

#[tokio::test]
async fn create_assigns_id_and_writes_no_history() {
  let (reg, index) = registry().await;
  let mut proposal = local("S1", None);
  proposal.common_mut().reg_id = RegId(999);

  let outcome = reg.create(&who(), ChangeRequest::new(proposal)).await.unwrap();
  assert_eq!(outcome.state, ChangeState::Committed);
  assert!(outcome.history.is_empty());
  assert_ne!(outcome.unit.reg_id(), RegId(999));
  assert!(outcome.unit.is_live());
  assert_eq!(outcome.unit.common().change_reason, ChangeReason::Create);
  assert_eq!(outcome.unit.common().end_period, statreg_core::unit::open_period());

  let stored = current(&reg, outcome.unit.key()).await;
  assert_eq!(stored, outcome.unit);
  assert_eq!(index.take_upserts(), [outcome.unit.key().document_id()]);
}

#[tokio::test]
async fn repeated_edits_form_a_contiguous_chain() {
  let (reg, _) = registry().await;
  let unit = create(&reg, local("S1", None)).await;

  for i in 0..3 {
    let mut proposal = current(&reg, unit.key()).await;
    proposal.common_mut().name = format!("Version {i}");
    let outcome = edit(&reg, proposal).await;
    assert_eq!(outcome.history.len(), 1);
  }

  assert_eq!(reg.verify_history(unit.key()).await.unwrap(), 3);
  let live = current(&reg, unit.key()).await;
  let history = reg.history(unit.key()).await.unwrap();
  assert_eq!(history[0].end_period(), live.common().start_period);
  for pair in history.windows(2) {
    assert_eq!(pair[1].end_period(), pair[0].start_period());
    assert!(pair[0].start_period() < pair[0].end_period());
  }
  assert!(history.iter().all(|h| h.successor() == unit.reg_id()));
  assert_eq!(history.last().unwrap().unit().common().name, "Unit S1");
}

#[tokio::test]
async fn resubmitting_the_stored_state_writes_nothing() {
  let (reg, index) = registry().await;
  let unit = create(&reg, local("S1", None)).await;
  index.take_upserts();

  let outcome = edit(&reg, current(&reg, unit.key()).await).await;
  assert_eq!(outcome.state, ChangeState::Unchanged);
  assert!(outcome.history.is_empty());
  assert_eq!(history_len(&reg, unit.key()).await, 0);
  assert_eq!(current(&reg, unit.key()).await.common().start_period, unit.common().start_period);
  assert!(index.take_upserts().is_empty());
}

#[tokio::test]
async fn backdated_edit_is_clamped_after_the_current_version() {
  let (reg, _) = registry().await;
  let unit = create(&reg, local("S1", None)).await;
  let mut proposal = unit.clone();
  proposal.common_mut().name = "Renamed".into();

  let earlier = unit.common().start_period - chrono::Duration::days(1);
  let outcome = reg.edit(&who(), ChangeRequest::new(proposal).at(earlier)).await.unwrap();
  assert!(outcome.unit.common().start_period > unit.common().start_period);
  assert_eq!(reg.verify_history(unit.key()).await.unwrap(), 1);
}

// ─── Propagation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn linking_a_local_unit_historizes_both_sides() {
  let (reg, index) = registry().await;
  let legal = create(&reg, legal("L42", None)).await;
  let shop = create(&reg, local("S1", None)).await;
  index.take_upserts();

  let mut proposal = shop.clone();
  proposal.set_upward_link(Some(legal.reg_id())).unwrap();
  let outcome = reg
    .edit(&who(), ChangeRequest::new(proposal).with_comment("moved under L42"))
    .await
    .unwrap();

  assert_eq!(outcome.state, ChangeState::Committed);
  assert_eq!(outcome.history.len(), 2);
  assert_eq!(outcome.collateral, [legal.key()]);

  let shop_history = reg.history(shop.key()).await.unwrap();
  assert_eq!(shop_history.len(), 1);
  assert_eq!(shop_history[0].unit().upward_link(), None);
  assert_eq!(shop_history[0].successor(), shop.reg_id());

  let legal_now = current(&reg, legal.key()).await;
  assert!(legal_now.children().unwrap().contains(shop.reg_id()));
  assert_eq!(legal_now.common().change_reason, ChangeReason::Edit);
  assert_eq!(legal_now.common().edit_comment.as_deref(), Some("moved under L42"));
  let legal_history = reg.history(legal.key()).await.unwrap();
  assert_eq!(legal_history.len(), 1);
  assert!(legal_history[0].unit().children().unwrap().is_empty());

  // both sides share one change timestamp
  assert_eq!(legal_now.common().start_period, outcome.unit.common().start_period);

  let mut expected = vec![shop.key().document_id(), legal.key().document_id()];
  expected.sort();
  assert_eq!(index.take_upserts(), expected);
}

#[tokio::test]
async fn member_list_edit_reconciles_only_the_difference() {
  let (reg, _) = registry().await;
  let parent = create(&reg, legal("L", None)).await;
  let a = create(&reg, local("A", Some(parent.reg_id()))).await;
  let b = create(&reg, local("B", Some(parent.reg_id()))).await;
  let c = create(&reg, local("C", None)).await;
  let parent = current(&reg, parent.key()).await;
  let parent_history = history_len(&reg, parent.key()).await;

  let mut proposal = parent.clone();
  *proposal.children_mut().unwrap() = IdSet::from_iter([b.reg_id(), c.reg_id()]);
  let outcome = edit(&reg, proposal).await;

  assert_eq!(sorted(outcome.collateral), sorted(vec![a.key(), c.key()]));
  assert_eq!(history_len(&reg, parent.key()).await, parent_history + 1);
  assert_eq!(history_len(&reg, a.key()).await, 1);
  assert_eq!(history_len(&reg, b.key()).await, 0);
  assert_eq!(history_len(&reg, c.key()).await, 1);
  assert_eq!(current(&reg, a.key()).await.upward_link(), None);
  assert_eq!(current(&reg, c.key()).await.upward_link(), Some(parent.reg_id()));
}

#[tokio::test]
async fn moving_a_member_updates_old_and_new_parent() {
  let (reg, _) = registry().await;
  let first = create(&reg, legal("L1", None)).await;
  let second = create(&reg, legal("L2", None)).await;
  let shop = create(&reg, local("S1", Some(first.reg_id()))).await;
  let other = create(&reg, local("S2", Some(first.reg_id()))).await;

  let mut proposal = current(&reg, shop.key()).await;
  proposal.set_upward_link(Some(second.reg_id())).unwrap();
  let outcome = edit(&reg, proposal).await;
  assert_eq!(sorted(outcome.collateral), sorted(vec![first.key(), second.key()]));

  assert_eq!(current(&reg, first.key()).await.children(), Some(&IdSet::from_iter([other.reg_id()])));
  assert_eq!(current(&reg, second.key()).await.children(), Some(&IdSet::from_iter([shop.reg_id()])));

  // attaching through the member list detaches from the previous parent
  let mut proposal = current(&reg, second.key()).await;
  proposal.children_mut().unwrap().insert(other.reg_id());
  let outcome = edit(&reg, proposal).await;
  assert_eq!(sorted(outcome.collateral), sorted(vec![other.key(), first.key()]));
  assert!(current(&reg, first.key()).await.children().unwrap().is_empty());
  assert_eq!(current(&reg, other.key()).await.upward_link(), Some(second.reg_id()));
}

#[tokio::test]
async fn linking_to_a_missing_unit_is_rejected() {
  let (reg, _) = registry().await;
  let err = reg
    .create(&who(), ChangeRequest::new(local("S1", Some(RegId(4242)))))
    .await
    .unwrap_err();
  assert!(matches!(err, ChangeError::BusinessRule(BusinessRule::InvalidLink { .. })));
  assert_eq!(reg.store().count_live().await.unwrap(), 0);
}

// ─── Liquidation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn liquidation_cascades_to_active_members_only() {
  let (reg, _) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  let active = create(&reg, legal("L1", Some(ent.reg_id()))).await;
  let shop = create(&reg, local("X", Some(active.reg_id()))).await;
  let closed = create(&reg, legal("L2", Some(ent.reg_id()))).await;

  edit(&reg, liquidate(current(&reg, closed.key()).await, "closed")).await;
  let closed_history = history_len(&reg, closed.key()).await;

  let outcome = edit(&reg, liquidate(current(&reg, ent.key()).await, "merged")).await;
  assert_eq!(sorted(outcome.collateral), sorted(vec![active.key(), shop.key()]));

  let ent_now = current(&reg, ent.key()).await;
  assert!(ent_now.common().liq_date.is_some());
  for key in [active.key(), shop.key()] {
    let unit = current(&reg, key).await;
    assert_eq!(unit.common().status, UnitStatus::Liquidated);
    assert_eq!(unit.common().liq_date, ent_now.common().liq_date);
    assert_eq!(unit.common().liq_reason.as_deref(), Some("merged"));
  }

  let closed_now = current(&reg, closed.key()).await;
  assert_eq!(closed_now.common().liq_reason.as_deref(), Some("closed"));
  assert_eq!(history_len(&reg, closed.key()).await, closed_history);
}

#[tokio::test]
async fn liquidating_the_last_active_member_is_rejected() {
  let (reg, _) = registry().await;
  let parent = create(&reg, legal("L", None)).await;
  let shop = create(&reg, local("X", Some(parent.reg_id()))).await;

  let err = reg
    .edit(&who(), ChangeRequest::new(liquidate(shop.clone(), "closed")))
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    ChangeError::BusinessRule(BusinessRule::LiquidateParentInstead { child, parent: p })
      if child == shop.key() && p == parent.key()
  ));
  assert_eq!(history_len(&reg, shop.key()).await, 0);
  assert!(!current(&reg, shop.key()).await.is_liquidated());
}

#[tokio::test]
async fn liquidated_units_cannot_change_status() {
  let (reg, _) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  edit(&reg, liquidate(ent.clone(), "merged")).await;

  let mut revived = current(&reg, ent.key()).await;
  let c = revived.common_mut();
  c.status = UnitStatus::Active;
  c.liq_date = None;
  c.liq_reason = None;
  let err = reg.edit(&who(), ChangeRequest::new(revived)).await.unwrap_err();
  assert!(matches!(err, ChangeError::BusinessRule(BusinessRule::UnitHasLiquidated(k)) if k == ent.key()));

  // descriptive edits remain allowed
  let mut renamed = current(&reg, ent.key()).await;
  renamed.common_mut().name = "Renamed".into();
  assert_eq!(edit(&reg, renamed).await.state, ChangeState::Committed);
}

// ─── Rejections ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_live_stat_id_is_rejected() {
  let (reg, _) = registry().await;
  create(&reg, local("S1", None)).await;
  let err = reg.create(&who(), ChangeRequest::new(local("S1", None))).await.unwrap_err();
  assert!(matches!(
    err,
    ChangeError::BusinessRule(BusinessRule::DuplicateStatId { kind: UnitKind::LocalUnit, .. })
  ));

  // the same stat id is fine for another kind
  create(&reg, legal("S1", None)).await;
}

#[tokio::test]
async fn validation_failure_aborts_before_any_write() {
  let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
  let hook = MandatoryFields::from_names(&["tax_reg_id"]).unwrap();
  let reg = Registry::new(store.clone(), Arc::new(ProbeIndex::default()), hook, EngineConfig::default());

  let err = reg.create(&who(), ChangeRequest::new(local("S1", None))).await.unwrap_err();
  let ChangeError::Validation(errors) = err else { panic!("expected a validation error") };
  assert!(errors.get("tax_reg_id").is_some());
  assert_eq!(store.count_live().await.unwrap(), 0);
}

#[tokio::test]
async fn writes_outside_the_identity_scope_are_refused() {
  let (reg, _) = registry().await;
  let clerk = IdentityContext::new(Uuid::from_u128(9), [UnitKind::LocalUnit]);

  let err = reg.create(&clerk, ChangeRequest::new(legal("L1", None))).await.unwrap_err();
  assert!(matches!(err, ChangeError::Unauthorized { kind: UnitKind::LegalUnit, .. }));
  assert!(reg.create(&clerk, ChangeRequest::new(local("S1", None))).await.is_ok());
}

#[tokio::test]
async fn editing_a_missing_unit_is_not_found() {
  let (reg, _) = registry().await;
  let mut ghost = local("S1", None);
  ghost.common_mut().reg_id = RegId(77);
  let err = reg.edit(&who(), ChangeRequest::new(ghost)).await.unwrap_err();
  assert!(matches!(err, ChangeError::NotFound(k) if k.reg_id == RegId(77)));
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_state() {
  let store = Arc::new(FailingStore {
    inner:       SqliteStore::open_in_memory().await.unwrap(),
    fail_commit: AtomicBool::new(false),
  });
  let index = Arc::new(ProbeIndex::default());
  let reg = Registry::new(store.clone(), index.clone(), AcceptAll, EngineConfig::default());

  let parent = reg.create(&who(), ChangeRequest::new(legal("L42", None))).await.unwrap().unit;
  let shop = reg.create(&who(), ChangeRequest::new(local("S1", None))).await.unwrap().unit;
  index.take_upserts();

  store.fail_commit.store(true, Ordering::SeqCst);
  let mut proposal = shop.clone();
  proposal.set_upward_link(Some(parent.reg_id())).unwrap();
  let err = reg.edit(&who(), ChangeRequest::new(proposal)).await.unwrap_err();
  assert!(matches!(err, ChangeError::Persistence(_)));
  assert!(err.to_string().starts_with("save failed"));

  store.fail_commit.store(false, Ordering::SeqCst);
  assert_eq!(reg.get(shop.key()).await.unwrap(), shop);
  assert!(reg.get(parent.key()).await.unwrap().children().unwrap().is_empty());
  assert!(reg.history(shop.key()).await.unwrap().is_empty());
  assert!(reg.history(parent.key()).await.unwrap().is_empty());
  assert!(index.take_upserts().is_empty());
}

// ─── Concurrent changes ──────────────────────────────────────────────────────

async fn gated_registry() -> (Registry<GatedStore, ProbeIndex>, Arc<GatedStore>) {
  let store = Arc::new(GatedStore::open().await);
  let index = Arc::new(ProbeIndex::default());
  (Registry::new(store.clone(), index, AcceptAll, EngineConfig::default()), store)
}

#[tokio::test]
async fn overlapping_links_to_one_parent_commit_only_once() {
  let (reg, store) = gated_registry().await;
  let parent = reg.create(&who(), ChangeRequest::new(legal("L42", None))).await.unwrap().unit;
  let a = reg.create(&who(), ChangeRequest::new(local("A", None))).await.unwrap().unit;
  let b = reg.create(&who(), ChangeRequest::new(local("B", None))).await.unwrap().unit;

  let link = |unit: &Unit| {
    let mut proposal = unit.clone();
    proposal.set_upward_link(Some(parent.reg_id())).unwrap();
    ChangeRequest::new(proposal)
  };
  store.hold_commits(2);
  let (who_a, who_b) = (who(), who());
  let (ra, rb) = tokio::join!(reg.edit(&who_a, link(&a)), reg.edit(&who_b, link(&b)));
  store.release();

  let (winner, loser, err) = match (ra, rb) {
    (Ok(_), Err(e)) => (a, b, e),
    (Err(e), Ok(_)) => (b, a, e),
    (ra, rb) => panic!(
      "expected exactly one commit, got {:?} and {:?}",
      ra.map(|o| o.state),
      rb.map(|o| o.state)
    ),
  };
  assert!(matches!(err, ChangeError::Persistence(_)));

  let stored_parent = reg.get(parent.key()).await.unwrap();
  assert_eq!(stored_parent.children(), Some(&IdSet::from_iter([winner.reg_id()])));
  assert_eq!(reg.get(winner.key()).await.unwrap().upward_link(), Some(parent.reg_id()));
  assert_eq!(reg.get(loser.key()).await.unwrap().upward_link(), None);
  assert_eq!(reg.verify_history(parent.key()).await.unwrap(), 1);
  assert!(reg.history(loser.key()).await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_edits_of_one_unit_keep_a_single_chain() {
  let (reg, store) = gated_registry().await;
  let shop = reg.create(&who(), ChangeRequest::new(local("S1", None))).await.unwrap().unit;

  let rename = |name: &str| {
    let mut proposal = shop.clone();
    proposal.common_mut().name = name.to_owned();
    ChangeRequest::new(proposal)
  };
  store.hold_commits(2);
  let (who_n, who_s) = (who(), who());
  let (north, south) =
    tokio::join!(reg.edit(&who_n, rename("North")), reg.edit(&who_s, rename("South")));
  store.release();

  let committed: Vec<_> = [north, south].into_iter().filter_map(Result::ok).collect();
  assert_eq!(committed.len(), 1);
  let stored = reg.get(shop.key()).await.unwrap();
  assert_eq!(stored.common().name, committed[0].unit.common().name);
  assert_eq!(reg.verify_history(shop.key()).await.unwrap(), 1);
}

// ─── Delete / restore ────────────────────────────────────────────────────────

#[tokio::test]
async fn deleting_the_last_local_unit_is_rejected() {
  let (reg, _) = registry().await;
  let parent = create(&reg, legal("L", None)).await;
  let shop = create(&reg, local("X", Some(parent.reg_id()))).await;

  let err = reg.delete(&who(), shop.key(), None).await.unwrap_err();
  assert!(matches!(err, ChangeError::BusinessRule(BusinessRule::LastChild { .. })));
  assert!(!current(&reg, shop.key()).await.is_deleted());
}

#[tokio::test]
async fn enterprise_with_active_members_cannot_be_deleted() {
  let (reg, _) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  create(&reg, legal("L", Some(ent.reg_id()))).await;

  let err = reg.delete(&who(), ent.key(), None).await.unwrap_err();
  assert!(matches!(err, ChangeError::BusinessRule(BusinessRule::HasActiveChildren(k)) if k == ent.key()));
}

#[tokio::test]
async fn deleting_a_legal_unit_cascades_and_restore_reverses_it() {
  let (reg, index) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  let parent = create(&reg, legal("L", Some(ent.reg_id()))).await;
  let x = create(&reg, local("X", Some(parent.reg_id()))).await;
  let y = create(&reg, local("Y", Some(parent.reg_id()))).await;

  let outcome = reg.delete(&who(), parent.key(), Some("closed down".into())).await.unwrap();
  assert_eq!(sorted(outcome.collateral), sorted(vec![x.key(), y.key(), ent.key()]));
  assert_eq!(outcome.unit.common().change_reason, ChangeReason::Delete);
  for key in [parent.key(), x.key(), y.key(), ent.key()] {
    let unit = current(&reg, key).await;
    assert!(unit.is_deleted() && unit.is_live());
    assert!(index.inner.document(key).await.is_none());
  }
  assert_eq!(reg.store().count_live().await.unwrap(), 0);

  // a member cannot come back while its legal unit is deleted
  let err = reg.restore(&who(), x.key(), None).await.unwrap_err();
  assert!(matches!(
    err,
    ChangeError::BusinessRule(BusinessRule::ParentDeleted { parent: p }) if p == parent.key()
  ));

  let outcome = reg.restore(&who(), parent.key(), None).await.unwrap();
  assert_eq!(outcome.unit.common().change_reason, ChangeReason::Undelete);
  for key in [parent.key(), x.key(), y.key(), ent.key()] {
    assert!(!current(&reg, key).await.is_deleted());
    assert!(index.inner.document(key).await.is_some());
  }
  // two member links, the delete and the restore
  assert_eq!(reg.verify_history(parent.key()).await.unwrap(), 4);

  // restoring twice is a no-op
  let again = reg.restore(&who(), parent.key(), None).await.unwrap();
  assert_eq!(again.state, ChangeState::Unchanged);
}

#[tokio::test]
async fn enterprise_survives_while_another_legal_unit_remains() {
  let (reg, _) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  let first = create(&reg, legal("L1", Some(ent.reg_id()))).await;
  create(&reg, legal("L2", Some(ent.reg_id()))).await;

  let outcome = reg.delete(&who(), first.key(), None).await.unwrap();
  assert!(outcome.collateral.is_empty());
  assert!(!current(&reg, ent.key()).await.is_deleted());
}

#[tokio::test]
async fn enterprise_with_deleted_members_cannot_be_restored() {
  let (reg, _) = registry().await;
  let ent = create(&reg, enterprise("E")).await;
  let member = create(&reg, legal("L", Some(ent.reg_id()))).await;
  reg.delete(&who(), member.key(), None).await.unwrap();
  assert!(current(&reg, ent.key()).await.is_deleted());

  let err = reg.restore(&who(), ent.key(), None).await.unwrap_err();
  assert!(matches!(
    err,
    ChangeError::BusinessRule(BusinessRule::HasDeletedChildren(k)) if k == ent.key()
  ));
  assert!(current(&reg, ent.key()).await.is_deleted());

  // restoring the legal unit brings the enterprise back with it
  reg.restore(&who(), member.key(), None).await.unwrap();
  assert!(!current(&reg, ent.key()).await.is_deleted());
}

// ─── Search mirror ───────────────────────────────────────────────────────────

#[tokio::test]
async fn dropped_index_write_heals_on_next_search() {
  let (reg, index) = registry().await;
  let shop = create(&reg, local("S1", None)).await;

  index.set_offline(true);
  let mut proposal = shop.clone();
  proposal.common_mut().name = "Renamed Shop".into();
  // the change commits even though the mirror is unreachable
  assert_eq!(edit(&reg, proposal).await.state, ChangeState::Committed);
  assert!(reg.synchronizer().is_resync_pending());

  index.set_offline(false);
  let query = SearchQuery { name: Some("renamed".into()), ..SearchQuery::default() };
  let page = reg.search(&query).await.unwrap();
  assert_eq!(page.total, 1);
  assert_eq!(page.documents[0].reg_id, shop.reg_id());
  assert_eq!(reg.synchronizer().rebuild_count(), 1);
  assert!(!reg.synchronizer().is_resync_pending());
}

#[tokio::test]
async fn unreachable_index_fails_search_and_schedules_resync() {
  let (reg, index) = registry().await;
  create(&reg, local("S1", None)).await;
  index.set_offline(true);

  let err = reg.search(&SearchQuery::default()).await.unwrap_err();
  assert!(matches!(err, crate::SyncError::Unreachable));
  assert!(reg.synchronizer().is_resync_pending());
}

#[tokio::test]
async fn matching_counts_skip_the_rebuild() {
  let (reg, index) = registry().await;
  let shop = create(&reg, local("S1", None)).await;
  create(&reg, legal("L1", None)).await;

  assert_eq!(reg.synchronize(false).await.unwrap(), SyncReport::InSync);
  assert_eq!(reg.synchronizer().rebuild_count(), 0);

  index.inner.delete(shop.key()).await.unwrap();
  assert_eq!(reg.synchronize(false).await.unwrap(), SyncReport::Rebuilt { documents: 2 });
  assert!(index.inner.document(shop.key()).await.is_some());
}

#[tokio::test]
async fn rebuild_pages_through_every_kind() {
  let config = EngineConfig { resync_batch_size: 2, ..EngineConfig::default() };
  let (reg, index) = registry_with(ProbeIndex::default(), config).await;
  for i in 0..5 {
    create(&reg, local(&format!("S{i}"), None)).await;
  }
  create(&reg, enterprise("E")).await;

  assert_eq!(reg.synchronize(true).await.unwrap(), SyncReport::Rebuilt { documents: 6 });
  assert_eq!(index.inner.count().await.unwrap(), 6);
}

#[tokio::test]
async fn concurrent_forced_resyncs_rebuild_once() {
  let (reg, _) = registry_with(ProbeIndex::slow(Duration::from_millis(50)), EngineConfig::default()).await;
  create(&reg, local("S1", None)).await;

  let (a, b) = tokio::join!(reg.synchronize(true), reg.synchronize(true));
  let mut reports = vec![a.unwrap(), b.unwrap()];
  reports.sort_by_key(|r| matches!(r, SyncReport::Coalesced));
  assert_eq!(reports, [SyncReport::Rebuilt { documents: 1 }, SyncReport::Coalesced]);
  assert_eq!(reg.synchronizer().rebuild_count(), 1);
}

// ─── Bulk ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_buffer_flushes_one_batch_per_kind() {
  let store = SqliteStore::open_in_memory().await.unwrap();
  let mut buffer = BulkHistoryBuffer::new();

  for mut live in [local("S1", None), local("S2", None), legal("L1", None)] {
    live.common_mut().reg_id = store.allocate_id().await.unwrap();
    let before = live.clone();
    live.common_mut().name.push_str(" renamed");
    let history_id = store.allocate_id().await.unwrap();
    let at = before.common().start_period + chrono::Duration::seconds(1);
    buffer.add_to_history_buffer(history::snapshot(&before, &mut live, history_id, at));
  }

  assert_eq!(buffer.len(), 3);
  assert!(buffer.should_flush(3));
  assert!(!buffer.should_flush(4));
  assert_eq!(buffer.flush(&store).await.unwrap(), 3);
  assert!(buffer.is_empty());
  assert_eq!(buffer.flush(&store).await.unwrap(), 0);
}

#[tokio::test]
async fn bulk_import_defers_history_until_flush() {
  let config = EngineConfig { bulk_flush_threshold: 100, ..EngineConfig::default() };
  let (reg, _) = registry_with(ProbeIndex::default(), config).await;

  let mut import = BulkImport::new(&reg, who());
  import.push(local("A", None)).await.unwrap();
  import.push(local("B", None)).await.unwrap();
  let mut renamed = local("A", None);
  renamed.common_mut().name = "A renamed".into();
  import.push(renamed).await.unwrap();
  import.push(local("B", None)).await.unwrap();
  import.push(local("C", Some(RegId(999_999)))).await.unwrap();

  let a = reg.find_live(UnitKind::LocalUnit, "A").await.unwrap().unwrap();
  assert_eq!(a.common().name, "A renamed");
  assert!(reg.history(a.key()).await.unwrap().is_empty());

  let summary = import.finish().await.unwrap();
  assert_eq!((summary.created, summary.edited, summary.unchanged), (2, 1, 1));
  assert_eq!(summary.history_rows, 1);
  assert_eq!(summary.failed.len(), 1);
  assert_eq!(summary.failed[0].row, 5);
  assert_eq!(summary.failed[0].stat_id, "C");
  assert_eq!(summary.rows(), 5);

  assert_eq!(reg.verify_history(a.key()).await.unwrap(), 1);
}

#[tokio::test]
async fn bulk_import_keeps_stored_members_when_row_lists_none() {
  let config = EngineConfig { bulk_flush_threshold: 1, ..EngineConfig::default() };
  let (reg, _) = registry_with(ProbeIndex::default(), config).await;
  let parent = create(&reg, legal("L1", None)).await;
  let shop = create(&reg, local("S1", Some(parent.reg_id()))).await;

  let mut import = BulkImport::new(&reg, who());
  let mut row = legal("L1", None);
  row.common_mut().name = "L1 renamed".into();
  import.push(row).await.unwrap();
  let summary = import.finish().await.unwrap();
  assert_eq!(summary.edited, 1);
  assert_eq!(summary.history_rows, 1);

  let parent_now = current(&reg, parent.key()).await;
  assert!(parent_now.children().unwrap().contains(shop.reg_id()));
  assert_eq!(current(&reg, shop.key()).await.upward_link(), Some(parent.reg_id()));
}
