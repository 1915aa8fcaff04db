//! Durable state that survives restarts: repair records and torrent metadata.

pub mod sqlite;

pub use sqlite::SqliteRepairStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DebridDavError, DebridDavResult};
use crate::types::{RepairEntry, RepairStatus, TorrentItem};

/// Filter for listing repair entries.
#[derive(Debug, Clone, Default)]
pub struct RepairFilter {
    pub status: Option<RepairStatus>,
    /// 0 means no limit
    pub limit: usize,
}

impl RepairFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: RepairStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

pub trait RepairStore: Send + Sync {
    /// Insert or replace the record for `entry.torrent_id`.
    fn upsert_entry(&self, entry: &RepairEntry) -> DebridDavResult<()>;

    fn get_entry(&self, torrent_id: &str) -> DebridDavResult<Option<RepairEntry>>;

    /// Entries ordered by most recently updated first.
    fn list_entries(&self, filter: &RepairFilter) -> DebridDavResult<Vec<RepairEntry>>;

    /// Returns whether a record existed.
    fn delete_entry(&self, torrent_id: &str) -> DebridDavResult<bool>;

    /// Number of entries per status.
    fn status_counts(&self) -> DebridDavResult<BTreeMap<String, u64>>;

    /// Replace the persisted catalog snapshot.
    fn save_torrents(&self, items: &[TorrentItem]) -> DebridDavResult<()>;

    fn load_torrents(&self) -> DebridDavResult<Vec<TorrentItem>>;

    /// Drop every durable record of one torrent.
    fn delete_torrent(&self, torrent_id: &str) -> DebridDavResult<()>;
}

/// Run one store call on the blocking pool. Store backends do synchronous
/// disk I/O behind a lock and must not stall the runtime threads.
pub async fn run_blocking<T, F>(store: &Arc<dyn RepairStore>, call: F) -> DebridDavResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn RepairStore) -> DebridDavResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| DebridDavError::Database(format!("store task failed: {}", e)))?
}
