//! SQLite-backed repair store.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{RepairFilter, RepairStore};
use crate::error::{DebridDavError, DebridDavResult};
use crate::types::{RepairEntry, RepairStatus, TorrentItem};

/// SQLite-backed store for repair entries and the torrent catalog snapshot.
pub struct SqliteRepairStore {
    conn: Mutex<Connection>,
}

impl SqliteRepairStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> DebridDavResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> DebridDavResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> DebridDavResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS repair_entries (
                torrent_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                hash TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                reason TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_repair_entries_status ON repair_entries(status);
            CREATE INDEX IF NOT EXISTS idx_repair_entries_updated ON repair_entries(updated_at);

            -- Last known catalog, loaded before the first remote refresh
            CREATE TABLE IF NOT EXISTS torrent_metadata (
                torrent_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct EntryRow {
    torrent_id: String,
    filename: String,
    hash: String,
    status: String,
    progress: f64,
    reason: String,
    updated_at: String,
}

impl EntryRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            torrent_id: row.get(0)?,
            filename: row.get(1)?,
            hash: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            reason: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_entry(self) -> DebridDavResult<RepairEntry> {
        let status = RepairStatus::from_str(&self.status).map_err(|_| {
            DebridDavError::Database(format!(
                "unknown repair status '{}' for {}",
                self.status, self.torrent_id
            ))
        })?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(RepairEntry {
            torrent_id: self.torrent_id,
            filename: self.filename,
            hash: self.hash,
            status,
            progress: self.progress,
            reason: self.reason,
            updated_at,
        })
    }
}

const ENTRY_COLUMNS: &str = "torrent_id, filename, hash, status, progress, reason, updated_at";

impl RepairStore for SqliteRepairStore {
    fn upsert_entry(&self, entry: &RepairEntry) -> DebridDavResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO repair_entries (torrent_id, filename, hash, status, progress, reason, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(torrent_id) DO UPDATE SET
                filename = excluded.filename,
                hash = excluded.hash,
                status = excluded.status,
                progress = excluded.progress,
                reason = excluded.reason,
                updated_at = excluded.updated_at",
            params![
                entry.torrent_id,
                entry.filename,
                entry.hash,
                entry.status.as_ref(),
                entry.progress,
                entry.reason,
                entry.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_entry(&self, torrent_id: &str) -> DebridDavResult<Option<RepairEntry>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {} FROM repair_entries WHERE torrent_id = ?", ENTRY_COLUMNS),
                params![torrent_id],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn list_entries(&self, filter: &RepairFilter) -> DebridDavResult<Vec<RepairEntry>> {
        let conn = self.lock();
        let limit = if filter.limit == 0 { -1 } else { filter.limit as i64 };

        let rows: Vec<EntryRow> = match filter.status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM repair_entries WHERE status = ?1
                     ORDER BY updated_at DESC LIMIT ?2",
                    ENTRY_COLUMNS
                ))?;
                let mapped = stmt.query_map(params![status.as_ref(), limit], EntryRow::from_row)?;
                mapped.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM repair_entries ORDER BY updated_at DESC LIMIT ?1",
                    ENTRY_COLUMNS
                ))?;
                let mapped = stmt.query_map(params![limit], EntryRow::from_row)?;
                mapped.collect::<rusqlite::Result<_>>()?
            }
        };

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn delete_entry(&self, torrent_id: &str) -> DebridDavResult<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "DELETE FROM repair_entries WHERE torrent_id = ?",
            params![torrent_id],
        )?;
        Ok(changed > 0)
    }

    fn status_counts(&self) -> DebridDavResult<BTreeMap<String, u64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM repair_entries GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count.max(0) as u64);
        }
        Ok(counts)
    }

    fn save_torrents(&self, items: &[TorrentItem]) -> DebridDavResult<()> {
        let mut conn = self.lock();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM torrent_metadata", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO torrent_metadata (torrent_id, data, updated_at) VALUES (?1, ?2, ?3)",
            )?;
            for item in items {
                let data = serde_json::to_string(item)?;
                stmt.execute(params![item.id, data, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_torrents(&self) -> DebridDavResult<Vec<TorrentItem>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT data FROM torrent_metadata ORDER BY torrent_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for row in rows {
            let data = row?;
            match serde_json::from_str::<TorrentItem>(&data) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable torrent metadata row"),
            }
        }
        Ok(items)
    }

    fn delete_torrent(&self, torrent_id: &str) -> DebridDavResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM torrent_metadata WHERE torrent_id = ?",
            params![torrent_id],
        )?;
        tx.execute(
            "DELETE FROM repair_entries WHERE torrent_id = ?",
            params![torrent_id],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, status: RepairStatus, reason: &str, age_secs: i64) -> RepairEntry {
        RepairEntry {
            status,
            updated_at: Utc::now() - Duration::seconds(age_secs),
            ..RepairEntry::queued(id, format!("{}.mkv", id), "hash", reason)
        }
    }

    fn item(id: &str) -> TorrentItem {
        TorrentItem {
            id: id.into(),
            name: id.into(),
            filename: id.into(),
            hash: "h".into(),
            bytes: 1,
            status: "downloaded".into(),
            progress: 100.0,
            added: None,
            ended: None,
            links: vec![],
            selected_files: Some(1),
            seen_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store
            .upsert_entry(&entry("a", RepairStatus::Queued, "no_links", 0))
            .unwrap();
        store
            .upsert_entry(&entry("a", RepairStatus::Fixed, "", 0))
            .unwrap();

        let loaded = store.get_entry("a").unwrap().unwrap();
        assert_eq!(loaded.status, RepairStatus::Fixed);
        assert!(store.get_entry("missing").unwrap().is_none());
    }

    #[test]
    fn test_list_filters_and_orders() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store.upsert_entry(&entry("old", RepairStatus::StillBroken, "timeout", 60)).unwrap();
        store.upsert_entry(&entry("new", RepairStatus::StillBroken, "timeout", 0)).unwrap();
        store.upsert_entry(&entry("nc", RepairStatus::NotCached, "not_cached", 0)).unwrap();

        let broken = store
            .list_entries(&RepairFilter::new().with_status(RepairStatus::StillBroken))
            .unwrap();
        let ids: Vec<_> = broken.iter().map(|e| e.torrent_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let limited = store.list_entries(&RepairFilter::new().with_limit(1)).unwrap();
        assert_eq!(limited.len(), 1);

        let counts = store.status_counts().unwrap();
        assert_eq!(counts.get("still_broken"), Some(&2));
        assert_eq!(counts.get("not_cached"), Some(&1));
    }

    #[test]
    fn test_torrent_snapshot_round_trip() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store.save_torrents(&[item("a"), item("b")]).unwrap();
        store.save_torrents(&[item("b")]).unwrap();

        let loaded = store.load_torrents().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "b");
    }

    #[test]
    fn test_delete_torrent_removes_everything() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store.save_torrents(&[item("a")]).unwrap();
        store.upsert_entry(&entry("a", RepairStatus::Queued, "no_links", 0)).unwrap();

        store.delete_torrent("a").unwrap();

        assert!(store.load_torrents().unwrap().is_empty());
        assert!(store.get_entry("a").unwrap().is_none());
        assert!(!store.delete_entry("a").unwrap());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("repair.db");
        {
            let store = SqliteRepairStore::new(&path).unwrap();
            store.upsert_entry(&entry("a", RepairStatus::Running, "no_links", 0)).unwrap();
        }
        let store = SqliteRepairStore::new(&path).unwrap();
        assert_eq!(store.get_entry("a").unwrap().unwrap().status, RepairStatus::Running);
    }
}
