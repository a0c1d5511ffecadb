//! SQLite persistence for per-day, per-source visibility aggregates and
//! operator-entered source metadata.
//!
//! The aggregate table is mutated through exactly two operations, both
//! expressed as single-row atomic upserts: increment-on-show and
//! add-duration-on-hide. Counters are never decremented.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result};

use scenelog_core::types::{SourceDayRow, SourceMetadata};

/// SQLite-backed aggregation store.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create the schema if it does not already exist.
    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS source_log (
                date            TEXT NOT NULL,
                source_name     TEXT NOT NULL,
                visible_count   INTEGER NOT NULL DEFAULT 0,
                total_duration  INTEGER NOT NULL DEFAULT 0,
                last_visible_at TEXT,
                created_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (date, source_name)
            );
            CREATE TABLE IF NOT EXISTS source_metadata (
                source_name TEXT PRIMARY KEY,
                title       TEXT NOT NULL DEFAULT '',
                category    TEXT NOT NULL DEFAULT '',
                brand       TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(())
    }

    /// Record one show for (date, source): `visible_count += 1`,
    /// `last_visible_at = at`. Creates the row on first show of the day.
    pub fn increment_show(&self, date: &str, source_name: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO source_log (date, source_name, visible_count, total_duration, last_visible_at)
             VALUES (?1, ?2, 1, 0, ?3)
             ON CONFLICT(date, source_name) DO UPDATE SET
                 visible_count = visible_count + 1,
                 last_visible_at = excluded.last_visible_at",
            params![date, source_name, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Add a finished session's duration to (date, source).
    ///
    /// Upserts rather than updates: a session that straddles midnight hides
    /// on a day that never saw its show, and its duration still belongs to
    /// the hide-day row (which starts at `visible_count = 0`).
    pub fn add_duration(&self, date: &str, source_name: &str, seconds: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO source_log (date, source_name, visible_count, total_duration)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(date, source_name) DO UPDATE SET
                 total_duration = total_duration + excluded.total_duration",
            params![date, source_name, seconds],
        )?;
        Ok(())
    }

    /// All aggregate rows for one day, joined with metadata, most recently
    /// visible first.
    pub fn read_day(&self, date: &str) -> Result<Vec<SourceDayRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT sl.date, sl.source_name, sl.visible_count, sl.total_duration,
                    sl.last_visible_at, sm.title, sm.category, sm.brand
             FROM source_log sl
             LEFT JOIN source_metadata sm ON sl.source_name = sm.source_name
             WHERE sl.date = ?1
             ORDER BY sl.last_visible_at DESC",
        )?;

        let rows = stmt.query_map(params![date], |row| {
            Ok(SourceDayRow {
                date: row.get(0)?,
                source_name: row.get(1)?,
                visible_count: row.get(2)?,
                total_duration: row.get(3)?,
                last_visible_at: row.get(4)?,
                title: row.get(5)?,
                category: row.get(6)?,
                brand: row.get(7)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Every day with at least one aggregate row, newest first.
    pub fn list_dates(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT date FROM source_log ORDER BY date DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Upsert display metadata for a source.
    pub fn set_metadata(&self, meta: &SourceMetadata) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO source_metadata (source_name, title, category, brand)
             VALUES (?1, ?2, ?3, ?4)",
            params![meta.source_name, meta.title, meta.category, meta.brand],
        )?;
        Ok(())
    }

    /// All metadata rows, ordered by source name.
    pub fn list_metadata(&self) -> Result<Vec<SourceMetadata>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_name, title, category, brand
             FROM source_metadata ORDER BY source_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SourceMetadata {
                source_name: row.get(0)?,
                title: row.get(1)?,
                category: row.get(2)?,
                brand: row.get(3)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Delete metadata for a source. Silently succeeds when absent.
    pub fn delete_metadata(&self, source_name: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM source_metadata WHERE source_name = ?1",
            params![source_name],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
