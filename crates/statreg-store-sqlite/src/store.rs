//! [`SqliteStore`], the SQLite implementation of [`UnitStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use statreg_core::{
  ids::{RegId, UnitKey},
  store::{UnitFilter, UnitStore, WriteBatch},
  unit::{Unit, UnitKind},
};

use crate::{
  Error, Result,
  encode::{RawUnit, RawWrite, UNIT_COLUMNS, encode_kind, encode_write},
  schema::SCHEMA,
};

const INSERT_UNIT: &str = "INSERT INTO units (
     reg_id, kind, stat_id, parent_id, start_period, end_period,
     is_deleted, upward_id, child_ids, details_json
   ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const UPDATE_LIVE_UNIT: &str = "UPDATE units SET
     stat_id = ?3, start_period = ?4, end_period = ?5, is_deleted = ?6,
     upward_id = ?7, child_ids = ?8, details_json = ?9
   WHERE reg_id = ?1 AND kind = ?2 AND parent_id IS NULL AND start_period = ?10";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A unit store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── UnitStore impl ──────────────────────────────────────────────────────────

impl UnitStore for SqliteStore {
  type Error = Error;

  async fn allocate_id(&self) -> Result<RegId> {
    let id = self
      .conn
      .call(|conn| {
        conn.execute("INSERT INTO reg_ids DEFAULT VALUES", [])?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(RegId(id))
  }

  async fn get(&self, key: UnitKey) -> Result<Option<Unit>> {
    let kind_str = encode_kind(key.kind).to_owned();
    let reg_id = key.reg_id.0;

    let raw: Option<RawUnit> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {UNIT_COLUMNS} FROM units WHERE reg_id = ?1 AND kind = ?2"),
              rusqlite::params![reg_id, kind_str],
              RawUnit::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUnit::into_unit).transpose()
  }

  async fn query(&self, kind: UnitKind, filter: &UnitFilter) -> Result<Vec<Unit>> {
    let kind_str        = encode_kind(kind).to_owned();
    let live_only       = filter.live_only;
    let include_deleted = filter.include_deleted;
    let stat_id         = filter.stat_id.clone();
    let history_of      = filter.history_of.map(|id| id.0);
    let upward          = filter.upward.map(|id| id.0);
    let after           = filter.after.map(|id| id.0);
    // SQLite treats a negative LIMIT as "no limit".
    let limit           = filter.limit.map(|l| l as i64).unwrap_or(-1);

    let raws: Vec<RawUnit> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {UNIT_COLUMNS} FROM units
           WHERE kind = ?1
             AND (?2 = 0 OR parent_id IS NULL)
             AND (?3 = 1 OR is_deleted = 0)
             AND (?4 IS NULL OR stat_id = ?4)
             AND (?5 IS NULL OR parent_id = ?5)
             AND (?6 IS NULL OR upward_id = ?6)
             AND (?7 IS NULL OR reg_id > ?7)
           ORDER BY reg_id
           LIMIT ?8"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              kind_str,
              live_only,
              include_deleted,
              stat_id,
              history_of,
              upward,
              after,
              limit,
            ],
            RawUnit::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnit::into_unit).collect()
  }

  async fn count_live(&self) -> Result<u64> {
    let n: i64 = self
      .conn
      .call(|conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM units WHERE parent_id IS NULL AND is_deleted = 0",
          [],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(n.max(0) as u64)
  }

  async fn commit(&self, batch: WriteBatch) -> Result<()> {
    let writes: Vec<RawWrite> = batch.iter().map(encode_write).collect::<Result<_>>()?;
    let count = writes.len();

    // `Some(id)` means an update missed its row or found a newer version;
    // the transaction was dropped, which rolls it back.
    let stale: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for write in &writes {
          match write {
            RawWrite::Insert(r) => {
              tx.execute(
                INSERT_UNIT,
                rusqlite::params![
                  r.reg_id,
                  r.kind,
                  r.stat_id,
                  r.parent_id,
                  r.start_period,
                  r.end_period,
                  r.is_deleted,
                  r.upward_id,
                  r.child_ids,
                  r.details_json,
                ],
              )?;
            }
            RawWrite::Update(r, expected) => {
              let changed = tx.execute(
                UPDATE_LIVE_UNIT,
                rusqlite::params![
                  r.reg_id,
                  r.kind,
                  r.stat_id,
                  r.start_period,
                  r.end_period,
                  r.is_deleted,
                  r.upward_id,
                  r.child_ids,
                  r.details_json,
                  expected,
                ],
              )?;
              if changed == 0 {
                return Ok(Some(r.reg_id));
              }
            }
          }
        }
        tx.commit()?;
        Ok(None)
      })
      .await?;

    if let Some(id) = stale {
      tracing::debug!(reg_id = id, "update lost to a concurrent change");
      return Err(Error::Stale(RegId(id)));
    }
    tracing::debug!(writes = count, "committed write batch");
    Ok(())
  }
}
