//! Relationship propagation: finding and reconciling the units an edit
//! affects one hierarchy level up or down.
//!
//! All work happens on a [`ChangeSet`], an in-memory working copy of every
//! unit the change touches. Nothing is written here; the set is handed to the
//! snapshot and persist stages afterwards.

use std::collections::BTreeMap;

use statreg_core::{
  ids::{IdSet, UnitKey},
  store::UnitStore,
  unit::{Unit, UnitKind},
};

use crate::{
  error::{BusinessRule, ChangeError, Result},
  rules::{inherit_liquidation, load_live},
};

// ─── Change set ──────────────────────────────────────────────────────────────

/// One unit in a [`ChangeSet`]: the stored state and the working copy.
#[derive(Debug, Clone)]
pub struct Touched {
  /// `None` for a unit being created.
  pub before:  Option<Unit>,
  pub current: Unit,
}

impl Touched {
  /// Whether persisting this entry would change anything.
  pub fn is_changed(&self) -> bool {
    self.before.as_ref().is_none_or(|b| !b.same_content(&self.current))
  }
}

/// The accumulator of one change: the primary unit plus every collaterally
/// loaded unit, keyed by address. Each unit is loaded at most once.
#[derive(Debug, Clone)]
pub struct ChangeSet {
  primary: UnitKey,
  units:   BTreeMap<UnitKey, Touched>,
}

impl ChangeSet {
  pub fn edit(before: Unit, proposed: Unit) -> Self {
    let primary = proposed.key();
    let units = BTreeMap::from([(primary, Touched { before: Some(before), current: proposed })]);
    Self { primary, units }
  }

  pub fn create(proposed: Unit) -> Self {
    let primary = proposed.key();
    let units = BTreeMap::from([(primary, Touched { before: None, current: proposed })]);
    Self { primary, units }
  }

  pub fn primary_key(&self) -> UnitKey { self.primary }

  pub fn primary(&self) -> Result<&Touched> {
    self
      .units
      .get(&self.primary)
      .ok_or_else(|| ChangeError::Invariant(format!("primary unit {} left the change set", self.primary)))
  }

  pub fn get(&self, key: UnitKey) -> Option<&Touched> { self.units.get(&key) }

  /// Collateral units whose state differs from what is stored.
  pub fn collateral(&self) -> Vec<UnitKey> {
    self
      .units
      .iter()
      .filter(|(key, t)| **key != self.primary && t.is_changed())
      .map(|(key, _)| *key)
      .collect()
  }

  pub fn into_units(self) -> impl Iterator<Item = (UnitKey, Touched)> { self.units.into_iter() }

  fn current(&self, key: UnitKey) -> Result<&Unit> {
    self
      .units
      .get(&key)
      .map(|t| &t.current)
      .ok_or_else(|| ChangeError::Invariant(format!("{key} is not in the change set")))
  }
}

// ─── Propagator ──────────────────────────────────────────────────────────────

/// Walks the hierarchy links of a [`ChangeSet`]'s primary unit and reconciles
/// every neighbour whose membership changed.
pub struct RelationshipPropagator<'a, S> {
  store: &'a S,
}

impl<'a, S: UnitStore> RelationshipPropagator<'a, S> {
  pub fn new(store: &'a S) -> Self { Self { store } }

  /// Run every reconciliation pass over `set`. Returns the keys of the
  /// collaterally changed units.
  pub async fn propagate(&self, set: &mut ChangeSet) -> Result<Vec<UnitKey>> {
    self.reconcile_upward(set).await?;
    self.reconcile_children(set).await?;
    self.cascade_liquidation(set).await?;
    self.cascade_deletion(set).await?;
    Ok(set.collateral())
  }

  /// Load `key` into the set unless it is already there, and return the
  /// working copy. Missing and historical rows yield `None`.
  async fn touch<'s>(&self, set: &'s mut ChangeSet, key: UnitKey) -> Result<Option<&'s mut Unit>> {
    if !set.units.contains_key(&key) {
      let Some(unit) = load_live(self.store, key).await? else { return Ok(None) };
      set.units.insert(key, Touched { before: Some(unit.clone()), current: unit });
    }
    Ok(set.units.get_mut(&key).map(|t| &mut t.current))
  }

  /// The primary unit moved from one parent to another: the old parent loses
  /// it from its member list, the new one gains it.
  async fn reconcile_upward(&self, set: &mut ChangeSet) -> Result<()> {
    let primary = set.primary()?;
    let id = primary.current.reg_id();
    let kind = primary.current.kind();
    let old = primary.before.as_ref().and_then(Unit::upward_key);
    let new = primary.current.upward_key();
    if old == new {
      return Ok(());
    }

    if let Some(old) = old {
      if let Some(parent) = self.touch(set, old).await? {
        parent.children_mut()?.remove(id);
      }
    }
    if let Some(new) = new {
      match self.touch(set, new).await? {
        Some(parent) => {
          parent.children_mut()?.insert(id);
        }
        None => return Err(BusinessRule::InvalidLink { from: kind, to: new }.into()),
      }
    }
    Ok(())
  }

  /// The primary unit's member list changed. Every id in the symmetric
  /// difference of the old and new lists is reconciled on its own: detached
  /// members drop their upward link, attached members take it, and an
  /// attached member's previous parent loses it.
  async fn reconcile_children(&self, set: &mut ChangeSet) -> Result<()> {
    let primary = set.primary()?;
    let Some(child_kind) = primary.current.kind().child() else { return Ok(()) };
    let parent = primary.current.key();
    let empty = IdSet::new();
    let old = primary.before.as_ref().and_then(Unit::children).unwrap_or(&empty);
    let new = primary.current.children().unwrap_or(&empty);
    let moved: Vec<_> = old
      .symmetric_difference(new)
      .into_iter()
      .map(|id| (id, new.contains(id)))
      .collect();

    for (id, attached) in moved {
      let key = UnitKey::new(child_kind, id);
      let Some(child) = self.touch(set, key).await? else {
        if attached {
          return Err(BusinessRule::InvalidLink { from: parent.kind, to: key }.into());
        }
        continue;
      };

      if !attached {
        if child.upward_link() == Some(parent.reg_id) {
          child.set_upward_link(None)?;
        }
        continue;
      }

      let previous = child.upward_key().filter(|k| k.reg_id != parent.reg_id);
      child.set_upward_link(Some(parent.reg_id))?;
      if let Some(previous) = previous {
        if let Some(old_parent) = self.touch(set, previous).await? {
          old_parent.children_mut()?.remove(id);
        }
      }
    }
    Ok(())
  }

  /// A unit entering the liquidated status takes every non-liquidated member
  /// with it, level by level down the hierarchy.
  async fn cascade_liquidation(&self, set: &mut ChangeSet) -> Result<()> {
    let primary = set.primary()?;
    let was_liquidated = primary.before.as_ref().is_some_and(Unit::is_liquidated);
    if !primary.current.is_liquidated() || was_liquidated {
      return Ok(());
    }

    let mut work = vec![set.primary_key()];
    while let Some(key) = work.pop() {
      let parent = set.current(key)?.clone();
      for child_key in parent.child_keys() {
        let Some(child) = self.touch(set, child_key).await? else { continue };
        if child.is_liquidated() {
          continue;
        }
        inherit_liquidation(child, parent.common());
        work.push(child_key);
      }
    }
    Ok(())
  }

  /// Deleting a legal unit deletes its local units, and its enterprise unit
  /// when no other non-deleted legal unit remains there. Restoring reverses
  /// both.
  async fn cascade_deletion(&self, set: &mut ChangeSet) -> Result<()> {
    let primary = set.primary()?;
    if primary.current.kind() != UnitKind::LegalUnit {
      return Ok(());
    }
    let Some(before) = &primary.before else { return Ok(()) };
    let deleting = primary.current.is_deleted();
    if before.is_deleted() == deleting {
      return Ok(());
    }
    let id = primary.current.reg_id();
    let members = primary.current.child_keys();
    let enterprise = primary.current.upward_key();

    for key in members {
      if let Some(member) = self.touch(set, key).await? {
        member.common_mut().is_deleted = deleting;
      }
    }

    let Some(enterprise_key) = enterprise else { return Ok(()) };
    if deleting {
      let Some(enterprise) = self.touch(set, enterprise_key).await? else { return Ok(()) };
      let siblings: Vec<UnitKey> =
        enterprise.child_keys().into_iter().filter(|k| k.reg_id != id).collect();
      for sibling in siblings {
        if load_live(self.store, sibling).await?.is_some_and(|s| !s.is_deleted()) {
          return Ok(());
        }
      }
      if let Some(enterprise) = self.touch(set, enterprise_key).await? {
        enterprise.common_mut().is_deleted = true;
      }
    } else if let Some(enterprise) = self.touch(set, enterprise_key).await? {
      enterprise.common_mut().is_deleted = false;
    }
    Ok(())
  }
}
