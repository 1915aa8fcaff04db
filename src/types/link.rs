use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::TorrentFile;

/// A resolved, playable URL for one torrent file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadLink {
    pub torrent_id: String,
    pub file_name: String,
    pub url: String,
    /// Token that produced the link; blamed on a later bandwidth failure
    pub token: String,
    /// Extra `Authorization` header for links served by the fallback endpoint
    #[serde(skip)]
    pub auth_header: Option<String>,
    pub filesize: Option<u64>,
    pub mime_type: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

/// Quarantine record for one file that failed to resolve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFileEntry {
    pub torrent_id: String,
    pub filename: String,
    pub reason: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Quarantine record for a whole torrent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenTorrentEntry {
    pub torrent_id: String,
    pub reason: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Memoized directory listing for one torrent: its visible files by name.
#[derive(Debug, Clone)]
pub struct DavCacheEntry {
    pub torrent_id: String,
    /// Hash of the listing signature the files were collected under
    pub key: String,
    pub files: Arc<Vec<(String, TorrentFile)>>,
}
