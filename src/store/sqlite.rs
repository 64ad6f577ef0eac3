//! SQLite datastore: incident rows and archival-location tracking.
//!
//! WAL mode with a normal synchronous level; each call runs in its own
//! implicit transaction. Statements go through the prepared-statement cache.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::core::errors::{EfmsError, Result};

/// Process name recorded with every incident row.
pub const PROCESS_NAME: &str = "efms";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS incidents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    incident_message TEXT NOT NULL,
    incident_time TEXT NOT NULL,
    incident_details TEXT,
    process_name TEXT NOT NULL,
    recovery_status TEXT NOT NULL DEFAULT 'PENDING'
);
CREATE INDEX IF NOT EXISTS idx_incidents_dedup
    ON incidents(incident_message, process_name, recovery_status);
CREATE TABLE IF NOT EXISTS archive_locations (
    source_path TEXT PRIMARY KEY,
    archive_path TEXT,
    recorded_at TEXT NOT NULL
);
";

/// Archival-location index keyed by source path. Lookup failures surface as
/// errors; callers decide the safe fallback.
pub trait ArchiveIndex: Send + Sync {
    /// The recorded archive path for a source file, if any. A row with a
    /// NULL archive path reads as `None`.
    fn archive_location(&self, source: &Path) -> Result<Option<PathBuf>>;

    /// Record (or replace) the archive path for a source file.
    fn record_archive(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// A stored incident row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRow {
    pub id: i64,
    pub message: String,
    pub time: String,
    pub details: Option<String>,
    pub process_name: String,
    pub recovery_status: String,
}

/// SQLite-backed store for incidents and archive locations.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file, applying pragmas and schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EfmsError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ──────────────────── incidents ────────────────────

    /// Whether an unresolved incident with this message already exists for
    /// this process.
    pub fn has_pending_incident(&self, message: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT 1 FROM incidents
             WHERE incident_message = ?1 AND process_name = ?2
               AND recovery_status = 'PENDING'
             LIMIT 1",
        )?;
        let found = stmt
            .query_row(params![message, PROCESS_NAME], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a new PENDING incident row.
    pub fn insert_incident(&self, message: &str, details: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO incidents
                 (incident_message, incident_time, incident_details,
                  process_name, recovery_status)
             VALUES (?1, ?2, ?3, ?4, 'PENDING')",
        )?;
        stmt.execute(params![message, now_utc(), details, PROCESS_NAME])?;
        Ok(())
    }

    /// Most recent incidents, newest first.
    pub fn recent_incidents(&self, limit: u32) -> Result<Vec<IncidentRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, incident_message, incident_time, incident_details,
                    process_name, recovery_status
             FROM incidents ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(IncidentRow {
                id: row.get(0)?,
                message: row.get(1)?,
                time: row.get(2)?,
                details: row.get(3)?,
                process_name: row.get(4)?,
                recovery_status: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Mark every PENDING incident with this message as recovered.
    pub fn resolve_incidents(&self, message: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "UPDATE incidents SET recovery_status = 'RECOVERED'
             WHERE incident_message = ?1 AND process_name = ?2
               AND recovery_status = 'PENDING'",
        )?;
        let changed = stmt.execute(params![message, PROCESS_NAME])?;
        Ok(changed)
    }
}

impl ArchiveIndex for SqliteStore {
    fn archive_location(&self, source: &Path) -> Result<Option<PathBuf>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT archive_path FROM archive_locations WHERE source_path = ?1",
        )?;
        let location: Option<Option<String>> = stmt
            .query_row(params![source.to_string_lossy()], |row| row.get(0))
            .optional()?;
        Ok(location.flatten().map(PathBuf::from))
    }

    fn record_archive(&self, source: &Path, destination: &Path) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO archive_locations (source_path, archive_path, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source_path) DO UPDATE SET
                 archive_path = excluded.archive_path,
                 recorded_at = excluded.recorded_at",
        )?;
        stmt.execute(params![
            source.to_string_lossy(),
            destination.to_string_lossy(),
            now_utc()
        ])?;
        Ok(())
    }
}

fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_roundtrip_and_dedup_query() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.has_pending_incident("disk probe failed").unwrap());

        store
            .insert_incident("disk probe failed", Some(r#"{"code":"EFMS-2001"}"#))
            .unwrap();
        assert!(store.has_pending_incident("disk probe failed").unwrap());
        assert!(!store.has_pending_incident("something else").unwrap());

        let rows = store.recent_incidents(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "disk probe failed");
        assert_eq!(rows[0].process_name, PROCESS_NAME);
        assert_eq!(rows[0].recovery_status, "PENDING");
    }

    #[test]
    fn resolved_incidents_no_longer_block_new_ones() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_incident("copy target down", None).unwrap();
        assert_eq!(store.resolve_incidents("copy target down").unwrap(), 1);
        assert!(!store.has_pending_incident("copy target down").unwrap());
    }

    #[test]
    fn archive_location_absent_then_recorded() {
        let store = SqliteStore::open_in_memory().unwrap();
        let src = Path::new("/mnt/storage/Spatial/Videos/a.mp4");
        assert!(store.archive_location(src).unwrap().is_none());

        store
            .record_archive(src, Path::new("/mnt/dds/Spatial/Videos/a.mp4"))
            .unwrap();
        assert_eq!(
            store.archive_location(src).unwrap(),
            Some(PathBuf::from("/mnt/dds/Spatial/Videos/a.mp4"))
        );
    }

    #[test]
    fn record_archive_replaces_existing_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let src = Path::new("/mnt/storage/Spatial/Analysis/a.parquet");
        store.record_archive(src, Path::new("/mnt/dds/old")).unwrap();
        store.record_archive(src, Path::new("/mnt/dds/new")).unwrap();
        assert_eq!(
            store.archive_location(src).unwrap(),
            Some(PathBuf::from("/mnt/dds/new"))
        );
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested/state/efms.sqlite3");
        let store = SqliteStore::open(&db_path).unwrap();
        store.insert_incident("boot", None).unwrap();
        assert!(db_path.exists());
    }
}
