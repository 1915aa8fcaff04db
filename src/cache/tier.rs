//! The caching tier: one independent cache per concern.
//!
//! Nothing here is updated transactionally across caches. Clearing a
//! quarantine after a repair and dropping a memoized listing are separate,
//! idempotent calls.

use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Cache, CacheStats};
use crate::config::CacheConfig;
use crate::error::{DebridDavError, DebridDavResult};
use crate::types::{
    BrokenTorrentEntry, DavCacheEntry, DownloadLink, FailedFileEntry, TorrentFile, TorrentInfo,
};

/// `(torrent id, file name)`
pub type FileKey = (String, String);

/// Visible files of one torrent by display name.
pub type Listing = Arc<Vec<(String, TorrentFile)>>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheTierStats {
    pub info: CacheStats,
    pub links: CacheStats,
    pub failed_files: CacheStats,
    pub broken_torrents: CacheStats,
    pub dav: CacheStats,
}

pub struct CacheTier {
    info: Cache<String, Arc<TorrentInfo>>,
    links: Cache<FileKey, DownloadLink>,
    failed_files: Cache<FileKey, FailedFileEntry>,
    broken_torrents: Cache<String, BrokenTorrentEntry>,
    dav: Cache<String, DavCacheEntry>,
}

impl CacheTier {
    pub fn new(config: &CacheConfig) -> Self {
        let max = config.max_entries;
        Self {
            info: Cache::new(max, Duration::from_secs(config.info_ttl)),
            links: Cache::with_predicates(max, config.link_ttl()),
            failed_files: Cache::with_predicates(max, config.failed_file_ttl()),
            broken_torrents: Cache::new(max, config.broken_torrent_ttl()),
            dav: Cache::new(max, Duration::from_secs(config.dav_ttl)),
        }
    }

    // === Torrent detail ===

    pub async fn get_info(&self, torrent_id: &str) -> Option<Arc<TorrentInfo>> {
        self.info.get(&torrent_id.to_string()).await
    }

    /// Keep the detail only if the torrent is complete. Returns whether it was cached.
    pub async fn put_info(&self, info: Arc<TorrentInfo>) -> bool {
        if !info.is_complete() {
            self.info.remove(&info.id).await;
            return false;
        }
        self.info.insert(info.id.clone(), info).await;
        true
    }

    // === Resolved links ===

    pub async fn get_link(&self, torrent_id: &str, file_name: &str) -> Option<DownloadLink> {
        self.links.get(&file_key(torrent_id, file_name)).await
    }

    pub async fn put_link(&self, link: DownloadLink) {
        let key = file_key(&link.torrent_id, &link.file_name);
        self.links.insert(key, link).await;
    }

    /// Return the cached link, or run `resolve` once for all concurrent
    /// callers asking for the same file. Failures are not cached.
    pub async fn link_or_resolve<F>(
        &self,
        torrent_id: &str,
        file_name: &str,
        resolve: F,
    ) -> DebridDavResult<DownloadLink>
    where
        F: Future<Output = DebridDavResult<DownloadLink>>,
    {
        self.links
            .try_get_with(file_key(torrent_id, file_name), resolve)
            .await
            .map_err(|e: Arc<DebridDavError>| (*e).clone())
    }

    pub async fn invalidate_link(&self, torrent_id: &str, file_name: &str) {
        self.links.remove(&file_key(torrent_id, file_name)).await;
    }

    /// Drop every link produced by `token`.
    pub fn invalidate_links_for_token(&self, token: &str) {
        let token = token.to_string();
        self.links.invalidate_if(move |_, link| link.token == token);
    }

    // === File quarantine ===

    pub async fn quarantine_file(&self, torrent_id: &str, filename: &str, err: &DebridDavError) {
        info!(
            torrent_id = torrent_id,
            file = filename,
            reason = %err.reason(),
            "Quarantining file"
        );
        let entry = FailedFileEntry {
            torrent_id: torrent_id.to_string(),
            filename: filename.to_string(),
            reason: err.reason(),
            error: err.to_string(),
            at: Utc::now(),
        };
        self.failed_files
            .insert(file_key(torrent_id, filename), entry)
            .await;
    }

    pub fn is_file_quarantined(&self, torrent_id: &str, filename: &str) -> bool {
        self.failed_files
            .contains_key(&file_key(torrent_id, filename))
    }

    pub async fn file_quarantine(&self, torrent_id: &str, filename: &str) -> Option<FailedFileEntry> {
        self.failed_files.get(&file_key(torrent_id, filename)).await
    }

    pub async fn clear_file(&self, torrent_id: &str, filename: &str) {
        if self
            .failed_files
            .remove(&file_key(torrent_id, filename))
            .await
            .is_some()
        {
            debug!(torrent_id = torrent_id, file = filename, "Cleared file quarantine");
        }
    }

    /// Names of the quarantined files of one torrent, sorted.
    pub fn quarantined_files_for(&self, torrent_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .failed_files
            .entries()
            .into_iter()
            .filter(|((id, _), _)| id == torrent_id)
            .map(|((_, name), _)| name)
            .collect();
        names.sort();
        names
    }

    pub fn failed_files(&self) -> Vec<FailedFileEntry> {
        self.failed_files.entries().into_iter().map(|(_, v)| v).collect()
    }

    // === Torrent quarantine ===

    pub async fn quarantine_torrent(&self, torrent_id: &str, err: &DebridDavError) {
        info!(torrent_id = torrent_id, reason = %err.reason(), "Quarantining torrent");
        let entry = BrokenTorrentEntry {
            torrent_id: torrent_id.to_string(),
            reason: err.reason(),
            error: err.to_string(),
            at: Utc::now(),
        };
        self.broken_torrents
            .insert(torrent_id.to_string(), entry)
            .await;
        self.dav.remove(&torrent_id.to_string()).await;
    }

    pub fn is_torrent_broken(&self, torrent_id: &str) -> bool {
        self.broken_torrents.contains_key(&torrent_id.to_string())
    }

    pub async fn broken_torrent(&self, torrent_id: &str) -> Option<BrokenTorrentEntry> {
        self.broken_torrents.get(&torrent_id.to_string()).await
    }

    pub async fn clear_torrent(&self, torrent_id: &str) {
        if self
            .broken_torrents
            .remove(&torrent_id.to_string())
            .await
            .is_some()
        {
            debug!(torrent_id = torrent_id, "Cleared torrent quarantine");
        }
    }

    pub fn broken_torrents(&self) -> Vec<BrokenTorrentEntry> {
        self.broken_torrents
            .entries()
            .into_iter()
            .map(|(_, v)| v)
            .collect()
    }

    // === Directory listings ===

    /// Memoized listing for `torrent_id`, only if it was collected under `key`.
    pub async fn get_dav(&self, torrent_id: &str, key: &str) -> Option<Listing> {
        self.dav
            .get(&torrent_id.to_string())
            .await
            .filter(|entry| entry.key == key)
            .map(|entry| entry.files)
    }

    pub async fn put_dav(&self, torrent_id: &str, key: String, files: Listing) {
        let entry = DavCacheEntry {
            torrent_id: torrent_id.to_string(),
            key,
            files,
        };
        self.dav.insert(torrent_id.to_string(), entry).await;
    }

    /// Forget everything known about one torrent.
    pub async fn invalidate_torrent(&self, torrent_id: &str) {
        let id = torrent_id.to_string();
        self.info.remove(&id).await;
        self.broken_torrents.remove(&id).await;
        self.dav.remove(&id).await;

        let for_links = id.clone();
        self.links.invalidate_if(move |(t, _), _| *t == for_links);
        self.failed_files.invalidate_if(move |(t, _), _| *t == id);
    }

    pub fn stats(&self) -> CacheTierStats {
        CacheTierStats {
            info: self.info.stats(),
            links: self.links.stats(),
            failed_files: self.failed_files.stats(),
            broken_torrents: self.broken_torrents.stats(),
            dav: self.dav.stats(),
        }
    }
}

fn file_key(torrent_id: &str, file_name: &str) -> FileKey {
    (torrent_id.to_string(), file_name.to_string())
}
