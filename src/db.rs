use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::record::ResultSet;

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("opening snapshot db {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            query      TEXT,
            created_at TEXT NOT NULL,
            data_json  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_query ON snapshots(query);
        ",
    )?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: i64,
    pub query: String,
    /// ISO-8601, UTC.
    pub created_at: String,
    pub rows: ResultSet,
}

pub fn save_snapshot(conn: &Connection, rows: &ResultSet, query: &str) -> Result<i64> {
    let data = rows.to_json().context("serializing result set")?;
    let created_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO snapshots (query, created_at, data_json) VALUES (?1, ?2, ?3)",
        params![query, created_at, data],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Snapshots newest first. `None` or an empty query returns all of them.
pub fn load_snapshots(conn: &Connection, query: Option<&str>) -> Result<Vec<Snapshot>> {
    let query = query.filter(|q| !q.is_empty());
    let mut stmt = conn.prepare(
        "SELECT id, COALESCE(query, ''), created_at, data_json
         FROM snapshots
         WHERE ?1 IS NULL OR query = ?1
         ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map(params![query], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(id, query, created_at, data)| {
            let rows = ResultSet::from_json(&data).unwrap_or_else(|e| {
                warn!("Snapshot {} has unreadable data: {}", id, e);
                ResultSet::empty()
            });
            Snapshot {
                id,
                query,
                created_at,
                rows,
            }
        })
        .collect())
}

pub fn delete_snapshot(conn: &Connection, id: i64) -> Result<bool> {
    let removed = conn.execute("DELETE FROM snapshots WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

fn has_table(conn: &Connection) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'snapshots'",
            [],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Where aggregation runs get recorded. Implemented by [`SnapshotStore`];
/// tests swap in their own.
pub trait SnapshotSink: Send + Sync {
    fn save(&self, rows: &ResultSet, query: &str) -> Result<i64>;
}

/// SQLite-backed snapshot history. Opens a connection per call, so it can be
/// shared freely between concurrent runs.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, rows: &ResultSet, query: &str) -> Result<i64> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn = connect(&self.path)?;
        init_schema(&conn)?;
        let id = save_snapshot(&conn, rows, query)?;
        debug!("Saved snapshot {} ({} rows) for '{}'", id, rows.len(), query);
        Ok(id)
    }

    /// Like [`SnapshotStore::load`] but surfaces errors.
    pub fn try_load(&self, query: Option<&str>) -> Result<Vec<Snapshot>> {
        let Some(conn) = self.open_existing()? else {
            return Ok(Vec::new());
        };
        load_snapshots(&conn, query)
    }

    /// Snapshots newest first; errors are logged and read as "none".
    pub fn load(&self, query: Option<&str>) -> Vec<Snapshot> {
        self.try_load(query).unwrap_or_else(|e| {
            warn!("Loading snapshots from {} failed: {:#}", self.path.display(), e);
            Vec::new()
        })
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let Some(conn) = self.open_existing()? else {
            return Ok(false);
        };
        delete_snapshot(&conn, id)
    }

    /// A connection to the database if it already holds the snapshots table.
    /// Reads never create the file.
    fn open_existing(&self) -> Result<Option<Connection>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = connect(&self.path)?;
        Ok(has_table(&conn)?.then_some(conn))
    }
}

impl SnapshotSink for SnapshotStore {
    fn save(&self, rows: &ResultSet, query: &str) -> Result<i64> {
        SnapshotStore::save(self, rows, query)
    }
}
