//! The history tracker: freezing a live unit into an immutable snapshot.
//!
//! Everything here is a pure data transformation. Callers allocate the
//! history row's id, pick the shared change timestamp, and persist the result.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  ids::RegId,
  unit::{Unit, UnitKind, open_period},
};

/// An immutable record of a unit's state as of the moment it stopped being
/// current. Its `parent_id` is the `RegId` of the live row that replaced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistorySnapshot {
  unit: Unit,
}

impl HistorySnapshot {
  /// Wrap a row read back from storage, checking that it is historical.
  pub fn from_stored(unit: Unit) -> Result<Self> {
    if unit.is_live() {
      return Err(Error::NotHistorical(unit.reg_id()));
    }
    Ok(Self { unit })
  }

  pub fn reg_id(&self) -> RegId { self.unit.reg_id() }

  pub fn kind(&self) -> UnitKind { self.unit.kind() }

  /// The live row this snapshot was superseded by.
  pub fn successor(&self) -> RegId {
    self.unit.common().parent_id.unwrap_or(RegId::UNASSIGNED)
  }

  pub fn start_period(&self) -> DateTime<Utc> { self.unit.common().start_period }

  pub fn end_period(&self) -> DateTime<Utc> { self.unit.common().end_period }

  pub fn unit(&self) -> &Unit { &self.unit }

  pub fn into_unit(self) -> Unit { self.unit }
}

/// Pick the timestamp for a change to a unit whose current version started at
/// `current_start`. The result is strictly later than `current_start`, so a
/// history row never has an empty or inverted interval.
pub fn change_timestamp(
  current_start: DateTime<Utc>,
  requested:     DateTime<Utc>,
) -> DateTime<Utc> {
  let floor = current_start + Duration::microseconds(1);
  requested.max(floor)
}

/// Freeze `before` into a history snapshot and advance `live`.
///
/// `before` is the stored live state prior to the change and `live` is the
/// state that will replace it; both describe the same row. The snapshot gets
/// `history_id`, points at `live`'s id, and closes at `as_of`. `live` is
/// reopened at `as_of`.
pub fn snapshot(
  before:     &Unit,
  live:       &mut Unit,
  history_id: RegId,
  as_of:      DateTime<Utc>,
) -> HistorySnapshot {
  let mut frozen = before.clone();
  {
    let common = frozen.common_mut();
    common.reg_id = history_id;
    common.parent_id = Some(live.reg_id());
    common.end_period = as_of;
  }

  let common = live.common_mut();
  common.parent_id = None;
  common.start_period = as_of;
  common.end_period = open_period();

  HistorySnapshot { unit: frozen }
}

/// Check that `history` (newest first) forms a gap-free chain ending at `live`.
pub fn verify_chain(live: &Unit, history: &[HistorySnapshot]) -> Result<()> {
  let mut next_start = live.common().start_period;
  for snap in history {
    if snap.successor() != live.reg_id() {
      return Err(Error::BrokenChain(snap.reg_id()));
    }
    if snap.end_period() != next_start || snap.start_period() >= snap.end_period() {
      return Err(Error::BrokenChain(snap.reg_id()));
    }
    next_start = snap.start_period();
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::unit::UnitCommon;

  fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

  fn live_local() -> Unit {
    let mut common = UnitCommon::new("S1", "Shop");
    common.reg_id = RegId(7);
    common.start_period = at(100);
    Unit::local(common, None)
  }

  #[test]
  fn snapshot_closes_old_state_and_reopens_live() {
    let before = live_local();
    let mut live = before.clone();
    live.set_upward_link(Some(RegId(42))).unwrap();

    let snap = snapshot(&before, &mut live, RegId(8), at(200));

    assert_eq!(snap.reg_id(), RegId(8));
    assert_eq!(snap.successor(), RegId(7));
    assert_eq!(snap.start_period(), at(100));
    assert_eq!(snap.end_period(), at(200));
    assert_eq!(snap.unit().upward_link(), None);

    assert!(live.is_live());
    assert_eq!(live.reg_id(), RegId(7));
    assert_eq!(live.common().start_period, at(200));
    assert_eq!(live.common().end_period, open_period());
  }

  #[test]
  fn change_timestamp_never_precedes_current_start() {
    assert_eq!(change_timestamp(at(100), at(200)), at(200));
    let clamped = change_timestamp(at(100), at(50));
    assert!(clamped > at(100));
  }

  #[test]
  fn verify_chain_accepts_contiguous_history() {
    let v0 = live_local();
    let mut v1 = v0.clone();
    let h0 = snapshot(&v0, &mut v1, RegId(8), at(200));
    let mut v2 = v1.clone();
    let h1 = snapshot(&v1, &mut v2, RegId(9), at(300));

    verify_chain(&v2, &[h1.clone(), h0.clone()]).unwrap();
    assert!(verify_chain(&v2, &[h0, h1]).is_err());
  }

  #[test]
  fn from_stored_rejects_live_rows() {
    assert!(matches!(
      HistorySnapshot::from_stored(live_local()),
      Err(Error::NotHistorical(RegId(7)))
    ));
  }
}
