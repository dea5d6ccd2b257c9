//! Statistical units: the four-level hierarchy of economic entities.
//!
//! A unit is stored as a chain of rows sharing one `stat_id`: exactly one live
//! row (`parent_id == None`, open `end_period`) and any number of history rows
//! whose `parent_id` points at the live row. The hierarchy runs
//! local unit → legal unit → enterprise unit → enterprise group; each level
//! holds one upward link and (except local units) a cached set of its live
//! children.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{
  Error, Result,
  ids::{IdSet, RegId, UnitKey},
};

/// Seconds since the epoch of `9999-12-31T23:59:59Z`, the open-period sentinel.
const OPEN_PERIOD_SECS: i64 = 253_402_300_799;

/// End of the validity interval of a live row.
pub fn open_period() -> DateTime<Utc> {
  DateTime::from_timestamp(OPEN_PERIOD_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ─── Enumerations ────────────────────────────────────────────────────────────

/// The closed set of unit variants.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitKind {
  LocalUnit,
  LegalUnit,
  EnterpriseUnit,
  EnterpriseGroup,
}

impl UnitKind {
  /// The level one step up the hierarchy, if any.
  pub fn parent(self) -> Option<UnitKind> {
    match self {
      Self::LocalUnit => Some(Self::LegalUnit),
      Self::LegalUnit => Some(Self::EnterpriseUnit),
      Self::EnterpriseUnit => Some(Self::EnterpriseGroup),
      Self::EnterpriseGroup => None,
    }
  }

  /// The level one step down the hierarchy, if any.
  pub fn child(self) -> Option<UnitKind> {
    match self {
      Self::LocalUnit => None,
      Self::LegalUnit => Some(Self::LocalUnit),
      Self::EnterpriseUnit => Some(Self::LegalUnit),
      Self::EnterpriseGroup => Some(Self::EnterpriseUnit),
    }
  }

  pub fn as_str(self) -> &'static str { self.into() }
}

/// Operational status of a unit. `Liquidated` is terminal and cascades to
/// dependents.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UnitStatus {
  #[default]
  Active,
  Inactive,
  Dormant,
  Liquidated,
}

/// Why a row was written.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeReason {
  #[default]
  Create,
  Edit,
  Delete,
  Undelete,
}

// ─── Shared fields ───────────────────────────────────────────────────────────

fn default_start() -> DateTime<Utc> { Utc::now() }

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCommon {
  #[serde(default)]
  pub reg_id:           RegId,
  pub stat_id:          String,
  #[serde(default)]
  pub parent_id:        Option<RegId>,
  #[serde(default = "default_start")]
  pub start_period:     DateTime<Utc>,
  #[serde(default = "open_period")]
  pub end_period:       DateTime<Utc>,

  pub name:             String,
  #[serde(default)]
  pub short_name:       Option<String>,
  #[serde(default)]
  pub tax_reg_id:       Option<String>,
  #[serde(default)]
  pub external_id:      Option<String>,
  #[serde(default)]
  pub region_id:        Option<i32>,
  #[serde(default)]
  pub address:          Option<String>,
  /// Activity category codes.
  #[serde(default)]
  pub activities:       BTreeSet<String>,
  #[serde(default)]
  pub primary_activity: Option<String>,
  #[serde(default)]
  pub employees:        Option<u32>,
  /// Turnover in minor currency units.
  #[serde(default)]
  pub turnover:         Option<i64>,
  /// Display names of related persons.
  #[serde(default)]
  pub persons:          BTreeSet<String>,

  #[serde(default)]
  pub status:           UnitStatus,
  #[serde(default)]
  pub liq_date:         Option<DateTime<Utc>>,
  #[serde(default)]
  pub liq_reason:       Option<String>,
  #[serde(default)]
  pub is_deleted:       bool,

  #[serde(default)]
  pub change_reason:    ChangeReason,
  #[serde(default)]
  pub edit_comment:     Option<String>,
  #[serde(default)]
  pub user_id:          Uuid,
}

impl UnitCommon {
  /// A proposed, not yet stored unit with every optional field empty.
  pub fn new(stat_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      reg_id:           RegId::UNASSIGNED,
      stat_id:          stat_id.into(),
      parent_id:        None,
      start_period:     Utc::now(),
      end_period:       open_period(),
      name:             name.into(),
      short_name:       None,
      tax_reg_id:       None,
      external_id:      None,
      region_id:        None,
      address:          None,
      activities:       BTreeSet::new(),
      primary_activity: None,
      employees:        None,
      turnover:         None,
      persons:          BTreeSet::new(),
      status:           UnitStatus::Active,
      liq_date:         None,
      liq_reason:       None,
      is_deleted:       false,
      change_reason:    ChangeReason::Create,
      edit_comment:     None,
      user_id:          Uuid::nil(),
    }
  }

  /// Field-by-field comparison of everything a user can change. Bookkeeping
  /// (`reg_id`, `parent_id`, periods, reason, comment, editor) is excluded.
  pub fn same_content(&self, other: &UnitCommon) -> bool {
    self.stat_id == other.stat_id
      && self.name == other.name
      && self.short_name == other.short_name
      && self.tax_reg_id == other.tax_reg_id
      && self.external_id == other.external_id
      && self.region_id == other.region_id
      && self.address == other.address
      && self.activities == other.activities
      && self.primary_activity == other.primary_activity
      && self.employees == other.employees
      && self.turnover == other.turnover
      && self.persons == other.persons
      && self.status == other.status
      && self.liq_date == other.liq_date
      && self.liq_reason == other.liq_reason
      && self.is_deleted == other.is_deleted
  }

  pub fn is_liquidated(&self) -> bool { self.status == UnitStatus::Liquidated }
}

// ─── Variants ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUnit {
  #[serde(flatten)]
  pub common:        UnitCommon,
  #[serde(default)]
  pub legal_unit_id: Option<RegId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegalUnit {
  #[serde(flatten)]
  pub common:                 UnitCommon,
  #[serde(default)]
  pub enterprise_unit_reg_id: Option<RegId>,
  /// Live local units whose `legal_unit_id` points here.
  #[serde(default)]
  pub local_unit_ids:         IdSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseUnit {
  #[serde(flatten)]
  pub common:         UnitCommon,
  #[serde(default)]
  pub ent_group_id:   Option<RegId>,
  /// Live legal units whose `enterprise_unit_reg_id` points here.
  #[serde(default)]
  pub legal_unit_ids: IdSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseGroup {
  #[serde(flatten)]
  pub common:              UnitCommon,
  /// Live enterprise units whose `ent_group_id` points here.
  #[serde(default)]
  pub enterprise_unit_ids: IdSet,
}

/// A statistical unit of any variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Unit {
  LocalUnit(LocalUnit),
  LegalUnit(LegalUnit),
  EnterpriseUnit(EnterpriseUnit),
  EnterpriseGroup(EnterpriseGroup),
}

impl Unit {
  pub fn local(common: UnitCommon, legal_unit_id: Option<RegId>) -> Self {
    Self::LocalUnit(LocalUnit { common, legal_unit_id })
  }

  pub fn legal(
    common: UnitCommon,
    enterprise_unit_reg_id: Option<RegId>,
    local_unit_ids: IdSet,
  ) -> Self {
    Self::LegalUnit(LegalUnit { common, enterprise_unit_reg_id, local_unit_ids })
  }

  pub fn enterprise(
    common: UnitCommon,
    ent_group_id: Option<RegId>,
    legal_unit_ids: IdSet,
  ) -> Self {
    Self::EnterpriseUnit(EnterpriseUnit { common, ent_group_id, legal_unit_ids })
  }

  pub fn group(common: UnitCommon, enterprise_unit_ids: IdSet) -> Self {
    Self::EnterpriseGroup(EnterpriseGroup { common, enterprise_unit_ids })
  }

  pub fn kind(&self) -> UnitKind {
    match self {
      Self::LocalUnit(_) => UnitKind::LocalUnit,
      Self::LegalUnit(_) => UnitKind::LegalUnit,
      Self::EnterpriseUnit(_) => UnitKind::EnterpriseUnit,
      Self::EnterpriseGroup(_) => UnitKind::EnterpriseGroup,
    }
  }

  pub fn common(&self) -> &UnitCommon {
    match self {
      Self::LocalUnit(u) => &u.common,
      Self::LegalUnit(u) => &u.common,
      Self::EnterpriseUnit(u) => &u.common,
      Self::EnterpriseGroup(u) => &u.common,
    }
  }

  pub fn common_mut(&mut self) -> &mut UnitCommon {
    match self {
      Self::LocalUnit(u) => &mut u.common,
      Self::LegalUnit(u) => &mut u.common,
      Self::EnterpriseUnit(u) => &mut u.common,
      Self::EnterpriseGroup(u) => &mut u.common,
    }
  }

  pub fn reg_id(&self) -> RegId { self.common().reg_id }

  pub fn key(&self) -> UnitKey { UnitKey::new(self.kind(), self.reg_id()) }

  /// A live row has no successor.
  pub fn is_live(&self) -> bool { self.common().parent_id.is_none() }

  pub fn is_deleted(&self) -> bool { self.common().is_deleted }

  pub fn is_liquidated(&self) -> bool { self.common().is_liquidated() }

  /// The id of the unit one level up, if linked.
  pub fn upward_link(&self) -> Option<RegId> {
    match self {
      Self::LocalUnit(u) => u.legal_unit_id,
      Self::LegalUnit(u) => u.enterprise_unit_reg_id,
      Self::EnterpriseUnit(u) => u.ent_group_id,
      Self::EnterpriseGroup(_) => None,
    }
  }

  /// The upward link as a full key, if linked.
  pub fn upward_key(&self) -> Option<UnitKey> {
    let parent = self.kind().parent()?;
    self.upward_link().map(|id| UnitKey::new(parent, id))
  }

  pub fn set_upward_link(&mut self, target: Option<RegId>) -> Result<()> {
    match self {
      Self::LocalUnit(u) => u.legal_unit_id = target,
      Self::LegalUnit(u) => u.enterprise_unit_reg_id = target,
      Self::EnterpriseUnit(u) => u.ent_group_id = target,
      Self::EnterpriseGroup(_) => return Err(Error::NoUpwardLink(UnitKind::EnterpriseGroup)),
    }
    Ok(())
  }

  /// The cached set of live children, if this level has children.
  pub fn children(&self) -> Option<&IdSet> {
    match self {
      Self::LocalUnit(_) => None,
      Self::LegalUnit(u) => Some(&u.local_unit_ids),
      Self::EnterpriseUnit(u) => Some(&u.legal_unit_ids),
      Self::EnterpriseGroup(u) => Some(&u.enterprise_unit_ids),
    }
  }

  pub fn children_mut(&mut self) -> Result<&mut IdSet> {
    match self {
      Self::LocalUnit(_) => Err(Error::NoChildList(UnitKind::LocalUnit)),
      Self::LegalUnit(u) => Ok(&mut u.local_unit_ids),
      Self::EnterpriseUnit(u) => Ok(&mut u.legal_unit_ids),
      Self::EnterpriseGroup(u) => Ok(&mut u.enterprise_unit_ids),
    }
  }

  /// Keys of the cached children.
  pub fn child_keys(&self) -> Vec<UnitKey> {
    match (self.kind().child(), self.children()) {
      (Some(kind), Some(ids)) => ids.iter().map(|id| UnitKey::new(kind, id)).collect(),
      _ => Vec::new(),
    }
  }

  /// Field-by-field equality of user-editable state, including the
  /// relationship fields. Two units of different variants are never equal.
  pub fn same_content(&self, other: &Unit) -> bool {
    match (self, other) {
      (Self::LocalUnit(a), Self::LocalUnit(b)) => {
        a.common.same_content(&b.common) && a.legal_unit_id == b.legal_unit_id
      }
      (Self::LegalUnit(a), Self::LegalUnit(b)) => {
        a.common.same_content(&b.common)
          && a.enterprise_unit_reg_id == b.enterprise_unit_reg_id
          && a.local_unit_ids == b.local_unit_ids
      }
      (Self::EnterpriseUnit(a), Self::EnterpriseUnit(b)) => {
        a.common.same_content(&b.common)
          && a.ent_group_id == b.ent_group_id
          && a.legal_unit_ids == b.legal_unit_ids
      }
      (Self::EnterpriseGroup(a), Self::EnterpriseGroup(b)) => {
        a.common.same_content(&b.common) && a.enterprise_unit_ids == b.enterprise_unit_ids
      }
      _ => false,
    }
  }
}
