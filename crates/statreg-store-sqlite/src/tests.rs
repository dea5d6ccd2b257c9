//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{DateTime, Utc};
use statreg_core::{
  history::snapshot,
  ids::{IdSet, RegId, UnitKey},
  store::{UnitFilter, UnitStore, WriteBatch},
  unit::{Unit, UnitCommon, UnitKind},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn at(secs: i64) -> DateTime<Utc> { DateTime::from_timestamp(secs, 0).unwrap() }

async fn legal(s: &SqliteStore, stat_id: &str, locals: IdSet) -> Unit {
  let mut common = UnitCommon::new(stat_id, format!("Legal {stat_id}"));
  common.reg_id = s.allocate_id().await.unwrap();
  common.start_period = at(1_000);
  common.user_id = Uuid::new_v4();
  Unit::legal(common, None, locals)
}

async fn insert(s: &SqliteStore, unit: &Unit) {
  let mut batch = WriteBatch::new();
  batch.insert(unit.clone());
  s.commit(batch).await.unwrap();
}

// ─── Ids ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn allocated_ids_are_distinct_and_increasing() {
  let s = store().await;
  let a = s.allocate_id().await.unwrap();
  let b = s.allocate_id().await.unwrap();
  assert!(a.is_assigned());
  assert!(b > a);
}

// ─── Reads and writes ────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_preserves_child_list() {
  let s = store().await;
  let unit = legal(&s, "L1", IdSet::from([5, 9])).await;
  insert(&s, &unit).await;

  let fetched = s.get(unit.key()).await.unwrap().expect("stored unit");
  assert_eq!(fetched, unit);
  assert_eq!(fetched.children(), Some(&IdSet::from([5, 9])));
}

#[tokio::test]
async fn get_with_wrong_kind_returns_none() {
  let s = store().await;
  let unit = legal(&s, "L1", IdSet::new()).await;
  insert(&s, &unit).await;

  let key = UnitKey::new(UnitKind::LocalUnit, unit.reg_id());
  assert!(s.get(key).await.unwrap().is_none());
}

#[tokio::test]
async fn history_rows_are_queryable_by_successor() {
  let s = store().await;
  let before = legal(&s, "L1", IdSet::new()).await;
  insert(&s, &before).await;

  let mut live = before.clone();
  live.common_mut().name = "Renamed".into();
  let hist_id = s.allocate_id().await.unwrap();
  let snap = snapshot(&before, &mut live, hist_id, at(2_000));

  let mut batch = WriteBatch::new();
  batch.insert_history(snap);
  batch.update(live.clone(), before.common().start_period);
  s.commit(batch).await.unwrap();

  let history = s
    .query(UnitKind::LegalUnit, &UnitFilter::history_of(live.reg_id()))
    .await
    .unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].common().name, "Legal L1");
  assert_eq!(history[0].common().end_period, at(2_000));

  let current = s
    .query(UnitKind::LegalUnit, &UnitFilter::live().with_stat_id("L1"))
    .await
    .unwrap();
  assert_eq!(current, vec![live]);
}

#[tokio::test]
async fn query_by_upward_link() {
  let s = store().await;
  for (stat, parent) in [("A", Some(RegId(7))), ("B", Some(RegId(8))), ("C", Some(RegId(7)))] {
    let mut common = UnitCommon::new(stat, stat);
    common.reg_id = s.allocate_id().await.unwrap();
    insert(&s, &Unit::local(common, parent)).await;
  }

  let children = s
    .query(UnitKind::LocalUnit, &UnitFilter::live().with_upward(RegId(7)))
    .await
    .unwrap();
  let names: Vec<_> = children.iter().map(|u| u.common().stat_id.as_str()).collect();
  assert_eq!(names, ["A", "C"]);
}

#[tokio::test]
async fn keyset_paging_walks_every_row_once() {
  let s = store().await;
  for i in 0..5 {
    let unit = legal(&s, &format!("L{i}"), IdSet::new()).await;
    insert(&s, &unit).await;
  }

  let mut seen = Vec::new();
  let mut after = None;
  loop {
    let page = s
      .query(UnitKind::LegalUnit, &UnitFilter::live().page(after, 2))
      .await
      .unwrap();
    let Some(last) = page.last() else { break };
    after = Some(last.reg_id());
    seen.extend(page.iter().map(|u| u.common().stat_id.clone()));
  }
  assert_eq!(seen, ["L0", "L1", "L2", "L3", "L4"]);
}

#[tokio::test]
async fn count_live_skips_history_and_deleted_rows() {
  let s = store().await;
  let a = legal(&s, "A", IdSet::new()).await;
  let mut b = legal(&s, "B", IdSet::new()).await;
  b.common_mut().is_deleted = true;
  insert(&s, &a).await;
  insert(&s, &b).await;

  let mut live = a.clone();
  let hist_id = s.allocate_id().await.unwrap();
  let snap = snapshot(&a, &mut live, hist_id, at(2_000));
  let mut batch = WriteBatch::new();
  batch.insert_history(snap);
  batch.update(live, a.common().start_period);
  s.commit(batch).await.unwrap();

  assert_eq!(s.count_live().await.unwrap(), 1);
}

// ─── Atomicity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_batch_leaves_no_partial_state() {
  let s = store().await;
  let a = legal(&s, "A", IdSet::new()).await;
  let ghost = legal(&s, "GHOST", IdSet::new()).await;

  let mut batch = WriteBatch::new();
  batch.insert(a.clone());
  batch.update(ghost.clone(), ghost.common().start_period);
  let err = s.commit(batch).await.unwrap_err();
  assert!(matches!(err, Error::Stale(id) if id == ghost.reg_id()));

  assert!(s.get(a.key()).await.unwrap().is_none());
}

#[tokio::test]
async fn update_from_an_outdated_read_is_rejected() {
  let s = store().await;
  let read = legal(&s, "L1", IdSet::new()).await;
  insert(&s, &read).await;

  // first writer moves the row to a new version
  let mut first = read.clone();
  let snap = snapshot(&read, &mut first, s.allocate_id().await.unwrap(), at(2_000));
  let mut batch = WriteBatch::new();
  batch.insert_history(snap);
  batch.update(first.clone(), read.common().start_period);
  s.commit(batch).await.unwrap();

  // second writer still holds the original version
  let mut second = read.clone();
  second.common_mut().name = "Renamed".into();
  let snap = snapshot(&read, &mut second, s.allocate_id().await.unwrap(), at(3_000));
  let mut batch = WriteBatch::new();
  batch.insert_history(snap);
  batch.update(second, read.common().start_period);
  let err = s.commit(batch).await.unwrap_err();
  assert!(matches!(err, Error::Stale(id) if id == read.reg_id()));

  assert_eq!(s.get(read.key()).await.unwrap(), Some(first.clone()));
  let history = s
    .query(UnitKind::LegalUnit, &UnitFilter::history_of(read.reg_id()))
    .await
    .unwrap();
  assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn second_live_row_for_same_stat_id_is_rejected() {
  let s = store().await;
  let a = legal(&s, "DUP", IdSet::new()).await;
  let b = legal(&s, "DUP", IdSet::new()).await;
  insert(&s, &a).await;

  let mut batch = WriteBatch::new();
  batch.insert(b);
  assert!(matches!(s.commit(batch).await, Err(Error::Database(_))));
}
