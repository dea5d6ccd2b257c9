//! Encoding and decoding helpers between domain types and SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings so that text order
//! equals time order. Reverse-multiplicity id sets become comma-joined lists;
//! everything else about a unit lives in `details_json`.

use std::str::FromStr as _;

use chrono::{DateTime, SecondsFormat, Utc};
use statreg_core::{
  ids::{IdSet, RegId},
  store::Write,
  unit::{Unit, UnitKind},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── UnitKind ────────────────────────────────────────────────────────────────

pub fn encode_kind(kind: UnitKind) -> &'static str { kind.as_str() }

pub fn decode_kind(s: &str) -> Result<UnitKind> {
  UnitKind::from_str(s).map_err(|_| statreg_core::Error::UnknownKind(s.to_owned()).into())
}

// ─── Id lists ────────────────────────────────────────────────────────────────

pub fn encode_ids(ids: &IdSet) -> String {
  ids.iter().map(|id| id.0.to_string()).collect::<Vec<_>>().join(",")
}

pub fn decode_ids(s: &str) -> Result<IdSet> {
  s.split(',')
    .map(str::trim)
    .filter(|part| !part.is_empty())
    .map(|part| part.parse::<i64>().map(RegId).map_err(|_| Error::IdList(s.to_owned())))
    .collect()
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column values of one `units` row.
#[derive(Debug)]
pub struct RawUnit {
  pub reg_id:       i64,
  pub kind:         String,
  pub stat_id:      String,
  pub parent_id:    Option<i64>,
  pub start_period: String,
  pub end_period:   String,
  pub is_deleted:   bool,
  pub upward_id:    Option<i64>,
  pub child_ids:    String,
  pub details_json: String,
}

/// Column list matching [`RawUnit::from_row`].
pub const UNIT_COLUMNS: &str = "reg_id, kind, stat_id, parent_id, start_period, end_period, \
                                is_deleted, upward_id, child_ids, details_json";

impl RawUnit {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      reg_id:       row.get(0)?,
      kind:         row.get(1)?,
      stat_id:      row.get(2)?,
      parent_id:    row.get(3)?,
      start_period: row.get(4)?,
      end_period:   row.get(5)?,
      is_deleted:   row.get(6)?,
      upward_id:    row.get(7)?,
      child_ids:    row.get(8)?,
      details_json: row.get(9)?,
    })
  }

  /// The id list is moved into its own column; the JSON carries the rest.
  pub fn encode(unit: &Unit) -> Result<Self> {
    let mut stripped = unit.clone();
    let children = match stripped.children_mut() {
      Ok(ids) => std::mem::take(ids),
      Err(_) => IdSet::new(),
    };
    let c = unit.common();
    Ok(Self {
      reg_id:       c.reg_id.0,
      kind:         encode_kind(unit.kind()).to_owned(),
      stat_id:      c.stat_id.clone(),
      parent_id:    c.parent_id.map(|id| id.0),
      start_period: encode_dt(c.start_period),
      end_period:   encode_dt(c.end_period),
      is_deleted:   c.is_deleted,
      upward_id:    unit.upward_link().map(|id| id.0),
      child_ids:    encode_ids(&children),
      details_json: serde_json::to_string(&stripped)?,
    })
  }

  /// Columns are authoritative for identity, period and deletion; the JSON
  /// supplies descriptive fields.
  pub fn into_unit(self) -> Result<Unit> {
    let kind = decode_kind(&self.kind)?;
    let mut unit: Unit = serde_json::from_str(&self.details_json)?;
    if unit.kind() != kind {
      return Err(statreg_core::Error::UnknownKind(self.kind).into());
    }

    let common = unit.common_mut();
    common.reg_id = RegId(self.reg_id);
    common.parent_id = self.parent_id.map(RegId);
    common.start_period = decode_dt(&self.start_period)?;
    common.end_period = decode_dt(&self.end_period)?;
    common.is_deleted = self.is_deleted;

    if kind.child().is_some() {
      *unit.children_mut()? = decode_ids(&self.child_ids)?;
    }
    Ok(unit)
  }
}

/// A [`Write`] flattened to column values, ready to move onto the database
/// thread.
#[derive(Debug)]
pub enum RawWrite {
  Insert(RawUnit),
  /// The row, plus the encoded `start_period` it must still have.
  Update(RawUnit, String),
}

pub fn encode_write(write: &Write) -> Result<RawWrite> {
  Ok(match write {
    Write::InsertHistory(snap) => RawWrite::Insert(RawUnit::encode(snap.unit())?),
    Write::Insert(unit) => RawWrite::Insert(RawUnit::encode(unit)?),
    Write::Update { unit, expected } => {
      RawWrite::Update(RawUnit::encode(unit)?, encode_dt(*expected))
    }
  })
}
