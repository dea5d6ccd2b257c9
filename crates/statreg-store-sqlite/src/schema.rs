//! SQL schema for the register's SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Source of RegIds, shared by every kind so ids never collide.
CREATE TABLE IF NOT EXISTS reg_ids (
    reg_id INTEGER PRIMARY KEY AUTOINCREMENT
);

-- Live and history rows of every kind. History rows are never updated.
CREATE TABLE IF NOT EXISTS units (
    reg_id       INTEGER PRIMARY KEY,
    kind         TEXT    NOT NULL,   -- 'local_unit' | 'legal_unit' | ...
    stat_id      TEXT    NOT NULL,
    parent_id    INTEGER,            -- NULL on the live row
    start_period TEXT    NOT NULL,   -- RFC 3339 UTC, fixed nanosecond width
    end_period   TEXT    NOT NULL,
    is_deleted   INTEGER NOT NULL DEFAULT 0,
    upward_id    INTEGER,            -- upward hierarchy link
    child_ids    TEXT    NOT NULL DEFAULT '',  -- comma-joined reverse list
    details_json TEXT    NOT NULL
);

-- At most one live row per entity.
CREATE UNIQUE INDEX IF NOT EXISTS units_live_stat_idx
    ON units(kind, stat_id) WHERE parent_id IS NULL;

CREATE INDEX IF NOT EXISTS units_parent_idx ON units(parent_id);
CREATE INDEX IF NOT EXISTS units_upward_idx ON units(upward_id);

PRAGMA user_version = 1;
";
