//! The search mirror's document shape and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  ids::{RegId, UnitKey},
  unit::{Unit, UnitKind, UnitStatus},
};

// ─── Document ────────────────────────────────────────────────────────────────

/// Flattened projection of a live unit. Never authoritative; always derivable
/// from the stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticDocument {
  pub id:               String,
  pub kind:             UnitKind,
  pub reg_id:           RegId,
  pub stat_id:          String,
  pub name:             String,
  pub short_name:       Option<String>,
  pub tax_reg_id:       Option<String>,
  pub external_id:      Option<String>,
  pub region_id:        Option<i32>,
  pub address:          Option<String>,
  pub activities:       Vec<String>,
  pub primary_activity: Option<String>,
  pub employees:        Option<u32>,
  pub turnover:         Option<i64>,
  pub persons:          Vec<String>,
  pub status:           UnitStatus,
  pub is_liquidated:    bool,
  pub liq_date:         Option<DateTime<Utc>>,
  /// Upward hierarchy link, for filtering by parent.
  pub parent_unit:      Option<RegId>,
  /// Start of the current version; the "last change" date.
  pub start_period:     DateTime<Utc>,
}

impl ElasticDocument {
  /// Project `unit` into a document, or `None` when the unit must not appear
  /// in the mirror (history rows and deleted units).
  pub fn from_unit(unit: &Unit) -> Option<Self> {
    if !unit.is_live() || unit.is_deleted() {
      return None;
    }
    let c = unit.common();
    Some(Self {
      id:               unit.key().document_id(),
      kind:             unit.kind(),
      reg_id:           c.reg_id,
      stat_id:          c.stat_id.clone(),
      name:             c.name.clone(),
      short_name:       c.short_name.clone(),
      tax_reg_id:       c.tax_reg_id.clone(),
      external_id:      c.external_id.clone(),
      region_id:        c.region_id,
      address:          c.address.clone(),
      activities:       c.activities.iter().cloned().collect(),
      primary_activity: c.primary_activity.clone(),
      employees:        c.employees,
      turnover:         c.turnover,
      persons:          c.persons.iter().cloned().collect(),
      status:           c.status,
      is_liquidated:    c.is_liquidated(),
      liq_date:         c.liq_date,
      parent_unit:      unit.upward_link(),
      start_period:     c.start_period,
    })
  }

  pub fn key(&self) -> UnitKey { UnitKey::new(self.kind, self.reg_id) }
}

// ─── Query ───────────────────────────────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 500;

/// Filter for [`crate::index::SearchIndexClient::search`]. Every field is
/// optional; absent fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
  /// Case-insensitive prefix of the name.
  pub name:               Option<String>,
  /// Prefix of the stat id.
  pub stat_id:            Option<String>,
  pub tax_reg_id:         Option<String>,
  pub kind:               Option<UnitKind>,
  pub region_id:          Option<i32>,
  /// Matches any of the unit's activity codes.
  pub activity:           Option<String>,
  pub employees_min:      Option<u32>,
  pub employees_max:      Option<u32>,
  pub include_liquidated: bool,
  /// Zero-based page number.
  pub page:               u32,
  pub page_size:          Option<u32>,
}

impl SearchQuery {
  pub fn limit(&self) -> usize {
    self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as usize
  }

  pub fn offset(&self) -> usize { self.page as usize * self.limit() }

  /// Reference semantics for the filter, used by in-process indexes.
  pub fn matches(&self, doc: &ElasticDocument) -> bool {
    if !self.include_liquidated && doc.is_liquidated {
      return false;
    }
    if self
      .name
      .as_ref()
      .is_some_and(|n| !doc.name.to_lowercase().starts_with(&n.to_lowercase()))
    {
      return false;
    }
    if self.stat_id.as_ref().is_some_and(|p| !doc.stat_id.starts_with(p.as_str())) {
      return false;
    }
    if self.tax_reg_id.is_some() && doc.tax_reg_id != self.tax_reg_id {
      return false;
    }
    if self.kind.is_some_and(|k| k != doc.kind) {
      return false;
    }
    if self.region_id.is_some() && doc.region_id != self.region_id {
      return false;
    }
    if self.activity.as_ref().is_some_and(|code| !doc.activities.contains(code)) {
      return false;
    }
    if self.employees_min.is_some() || self.employees_max.is_some() {
      let Some(employees) = doc.employees else { return false };
      if self.employees_min.is_some_and(|min| employees < min)
        || self.employees_max.is_some_and(|max| employees > max)
      {
        return false;
      }
    }
    true
  }
}

/// One page of search results plus the total match count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
  pub documents: Vec<ElasticDocument>,
  pub total:     u64,
}
