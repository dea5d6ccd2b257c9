//! Business rules checked before anything is written.
//!
//! The pure helpers normalise liquidation fields; the async checks read the
//! neighbourhood of a unit from the store and reject changes that would break
//! register policy.

use chrono::{DateTime, Utc};
use statreg_core::{
  ids::UnitKey,
  store::{UnitFilter, UnitStore},
  unit::{Unit, UnitCommon, UnitKind, UnitStatus},
};

use crate::error::{BusinessRule, ChangeError, Result};

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Fetch the live row at `key`, or `None` if it is missing or historical.
pub(crate) async fn load_live<S: UnitStore>(store: &S, key: UnitKey) -> Result<Option<Unit>> {
  let unit = store.get(key).await.map_err(ChangeError::persistence)?;
  Ok(unit.filter(Unit::is_live))
}

/// The live rows listed in `unit`'s child list. Ids that no longer resolve
/// are skipped.
pub(crate) async fn load_children<S: UnitStore>(store: &S, unit: &Unit) -> Result<Vec<Unit>> {
  let mut children = Vec::new();
  for key in unit.child_keys() {
    if let Some(child) = load_live(store, key).await? {
      children.push(child);
    }
  }
  Ok(children)
}

// ─── Liquidation ─────────────────────────────────────────────────────────────

/// A liquidated unit may be edited, but its status may not leave
/// `Liquidated`.
pub fn check_status_transition(before: &Unit, proposed: &Unit) -> Result<(), BusinessRule> {
  if before.is_liquidated() && proposed.common().status != UnitStatus::Liquidated {
    return Err(BusinessRule::UnitHasLiquidated(before.key()));
  }
  Ok(())
}

/// Bring the liquidation fields of `proposed` into a consistent shape.
///
/// A liquidation date or reason implies the liquidated status. A liquidated
/// unit always has a date, carried over from `before` or defaulting to `now`;
/// a reason recorded earlier is kept when the proposal omits one.
pub fn normalize_liquidation(before: Option<&Unit>, proposed: &mut Unit, now: DateTime<Utc>) {
  let previous = before.map(Unit::common);
  let c = proposed.common_mut();
  if c.liq_date.is_some() || c.liq_reason.is_some() {
    c.status = UnitStatus::Liquidated;
  }
  if c.status != UnitStatus::Liquidated {
    return;
  }
  if c.liq_date.is_none() {
    c.liq_date = previous.and_then(|p| p.liq_date).or(Some(now));
  }
  if c.liq_reason.is_none() {
    c.liq_reason = previous.and_then(|p| p.liq_reason.clone());
  }
}

/// Copy a parent's liquidation onto a child reached by the cascade.
///
/// The child takes the parent's date. It takes the parent's reason only when
/// the parent has one; otherwise the child's own reason survives.
pub fn inherit_liquidation(child: &mut Unit, parent: &UnitCommon) {
  let c = child.common_mut();
  c.status = UnitStatus::Liquidated;
  c.liq_date = parent.liq_date;
  if parent.liq_reason.is_some() {
    c.liq_reason = parent.liq_reason.clone();
  }
}

/// Reject liquidating the last active member of a parent that is itself
/// still active; the parent must be liquidated instead.
pub async fn check_liquidation_parent<S: UnitStore>(
  store: &S,
  before: Option<&Unit>,
  proposed: &Unit,
) -> Result<()> {
  let newly_liquidated = proposed.is_liquidated() && !before.is_some_and(Unit::is_liquidated);
  if !newly_liquidated {
    return Ok(());
  }
  let Some(parent_key) = proposed.upward_key() else { return Ok(()) };
  let Some(parent) = load_live(store, parent_key).await? else { return Ok(()) };
  if parent.is_liquidated() || parent.is_deleted() {
    return Ok(());
  }

  let active_siblings = load_children(store, &parent)
    .await?
    .into_iter()
    .filter(|s| s.reg_id() != proposed.reg_id() && !s.is_liquidated() && !s.is_deleted())
    .count();
  if active_siblings == 0 {
    return Err(BusinessRule::LiquidateParentInstead { child: proposed.key(), parent: parent_key }.into());
  }
  Ok(())
}

// ─── Links and identity ──────────────────────────────────────────────────────

/// Every link added by this change must target a live, non-deleted unit of
/// the adjacent level. Links that already existed are not re-checked.
pub async fn check_links<S: UnitStore>(store: &S, before: Option<&Unit>, proposed: &Unit) -> Result<()> {
  let kind = proposed.kind();
  let old_upward = before.and_then(Unit::upward_key);
  if let Some(target) = proposed.upward_key().filter(|t| old_upward != Some(*t)) {
    require_linkable(store, kind, target).await?;
  }

  let old_children = before.and_then(Unit::children);
  for key in proposed.child_keys() {
    if old_children.is_some_and(|ids| ids.contains(key.reg_id)) {
      continue;
    }
    require_linkable(store, kind, key).await?;
  }
  Ok(())
}

async fn require_linkable<S: UnitStore>(store: &S, from: UnitKind, to: UnitKey) -> Result<()> {
  match load_live(store, to).await? {
    Some(target) if !target.is_deleted() => Ok(()),
    _ => Err(BusinessRule::InvalidLink { from, to }.into()),
  }
}

/// At most one live row per stat id and kind.
pub async fn check_unique_stat_id<S: UnitStore>(
  store: &S,
  before: Option<&Unit>,
  proposed: &Unit,
) -> Result<()> {
  let stat_id = &proposed.common().stat_id;
  if before.is_some_and(|b| &b.common().stat_id == stat_id) {
    return Ok(());
  }
  let filter = UnitFilter::live_with_deleted().with_stat_id(stat_id.clone());
  let clash = store
    .query(proposed.kind(), &filter)
    .await
    .map_err(ChangeError::persistence)?
    .into_iter()
    .any(|u| u.reg_id() != proposed.reg_id());
  if clash {
    return Err(BusinessRule::DuplicateStatId { kind: proposed.kind(), stat_id: stat_id.clone() }.into());
  }
  Ok(())
}

// ─── Delete / restore ────────────────────────────────────────────────────────

/// Deleting the last member of a legal unit is rejected, as is deleting an
/// enterprise unit or group that still has non-deleted members. Legal units
/// take their members with them, so they are never blocked.
pub async fn check_delete<S: UnitStore>(store: &S, unit: &Unit) -> Result<()> {
  match unit.kind() {
    UnitKind::LocalUnit => {
      let Some(parent_key) = unit.upward_key() else { return Ok(()) };
      let Some(parent) = load_live(store, parent_key).await? else { return Ok(()) };
      if parent.is_deleted() {
        return Ok(());
      }
      let others = load_children(store, &parent)
        .await?
        .into_iter()
        .filter(|s| s.reg_id() != unit.reg_id() && !s.is_deleted())
        .count();
      if others == 0 {
        return Err(BusinessRule::LastChild { child: unit.key(), parent: parent_key }.into());
      }
      Ok(())
    }
    UnitKind::LegalUnit => Ok(()),
    UnitKind::EnterpriseUnit | UnitKind::EnterpriseGroup => {
      let active = load_children(store, unit).await?.iter().any(|c| !c.is_deleted());
      if active {
        return Err(BusinessRule::HasActiveChildren(unit.key()).into());
      }
      Ok(())
    }
  }
}

/// A local unit or enterprise unit cannot come back while its parent is
/// deleted, and an enterprise unit not while any of its legal units is.
/// Restoring a legal unit restores its enterprise unit as well.
pub async fn check_restore<S: UnitStore>(store: &S, unit: &Unit) -> Result<()> {
  if !matches!(unit.kind(), UnitKind::LocalUnit | UnitKind::EnterpriseUnit) {
    return Ok(());
  }
  if let Some(parent_key) = unit.upward_key() {
    if load_live(store, parent_key).await?.is_some_and(|p| p.is_deleted()) {
      return Err(BusinessRule::ParentDeleted { parent: parent_key }.into());
    }
  }
  if unit.kind() == UnitKind::EnterpriseUnit {
    let deleted = load_children(store, unit).await?.iter().any(Unit::is_deleted);
    if deleted {
      return Err(BusinessRule::HasDeletedChildren(unit.key()).into());
    }
  }
  Ok(())
}
