use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::file::TorrentFile;
use crate::fs::naming::assign_names;

/// Remote statuses that mean the torrent will never become playable.
pub const ERROR_STATUSES: &[&str] = &["magnet_error", "error", "virus", "dead"];

/// One torrent as known to the remote service; a top-level collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentItem {
    pub id: String,
    /// Sanitized, collision-free directory name assigned by the catalog
    #[serde(default)]
    pub name: String,
    pub filename: String,
    pub hash: String,
    pub bytes: u64,
    pub status: String,
    pub progress: f64,
    pub added: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    /// Restricted provider links, one per selected file
    pub links: Vec<String>,
    /// Known only once the torrent detail has been fetched
    pub selected_files: Option<usize>,
    /// When the catalog first saw this torrent
    pub seen_at: DateTime<Utc>,
}

impl TorrentItem {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0 || self.status == "downloaded"
    }

    pub fn is_error_status(&self) -> bool {
        ERROR_STATUSES.contains(&self.status.as_str())
    }

    /// Modification time exposed over WebDAV: ended if completed, else added,
    /// else the time the catalog first saw it.
    pub fn modified(&self) -> DateTime<Utc> {
        match (self.is_complete(), self.ended, self.added) {
            (true, Some(ended), _) => ended,
            (_, _, Some(added)) => added,
            _ => self.seen_at,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.added.unwrap_or(self.seen_at)
    }

    /// Carry over catalog-owned fields from an older snapshot of the same torrent.
    pub fn inherit(&mut self, previous: &TorrentItem) {
        self.seen_at = previous.seen_at;
        if self.selected_files.is_none() {
            self.selected_files = previous.selected_files;
        }
    }
}

/// Full detail of a torrent: every file plus completion state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    pub id: String,
    pub filename: String,
    pub hash: String,
    pub bytes: u64,
    pub status: String,
    pub progress: f64,
    pub added: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub files: Vec<TorrentFile>,
    pub links: Vec<String>,
}

impl TorrentInfo {
    /// Only complete details may be cached; anything else is re-fetched.
    pub fn is_complete(&self) -> bool {
        self.progress >= 100.0
    }

    pub fn selected_files(&self) -> impl Iterator<Item = &TorrentFile> {
        self.files.iter().filter(|f| f.selected)
    }

    /// Selected files with their unique, flat display names.
    pub fn listing(&self) -> Vec<(String, &TorrentFile)> {
        let selected: Vec<&TorrentFile> = self.selected_files().collect();
        let names = assign_names(selected.iter().map(|f| f.base_name()));
        names.into_iter().zip(selected).collect()
    }

    /// Look up a selected file by its display name.
    pub fn find_file(&self, name: &str) -> Option<&TorrentFile> {
        self.listing()
            .into_iter()
            .find(|(display, _)| display == name)
            .map(|(_, file)| file)
    }

    /// Build the catalog entry for this torrent.
    pub fn to_item(&self, seen_at: DateTime<Utc>) -> TorrentItem {
        TorrentItem {
            id: self.id.clone(),
            name: String::new(),
            filename: self.filename.clone(),
            hash: self.hash.clone(),
            bytes: self.bytes,
            status: self.status.clone(),
            progress: self.progress,
            added: self.added,
            ended: self.ended,
            links: self.links.clone(),
            selected_files: Some(self.selected_files().count()),
            seen_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(progress: f64, added: Option<i64>, ended: Option<i64>) -> TorrentItem {
        TorrentItem {
            id: "abc".into(),
            name: "Movie".into(),
            filename: "Movie".into(),
            hash: "h".into(),
            bytes: 10,
            status: if progress >= 100.0 { "downloaded" } else { "downloading" }.into(),
            progress,
            added: added.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            ended: ended.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            links: vec![],
            selected_files: None,
            seen_at: Utc.timestamp_opt(50, 0).unwrap(),
        }
    }

    #[test]
    fn test_modified_prefers_ended_when_complete() {
        assert_eq!(item(100.0, Some(10), Some(20)).modified().timestamp(), 20);
        assert_eq!(item(40.0, Some(10), Some(20)).modified().timestamp(), 10);
        assert_eq!(item(40.0, None, None).modified().timestamp(), 50);
        assert_eq!(item(100.0, None, None).modified().timestamp(), 50);
    }

    #[test]
    fn test_listing_only_selected_and_unique() {
        let info = TorrentInfo {
            id: "abc".into(),
            filename: "Pack".into(),
            hash: "h".into(),
            bytes: 3,
            status: "downloaded".into(),
            progress: 100.0,
            added: None,
            ended: None,
            files: vec![
                TorrentFile::new(1, "/a/ep1.mkv", 1, true),
                TorrentFile::new(2, "/b/ep1.mkv", 1, true),
                TorrentFile::new(3, "/sample.mkv", 1, false),
            ],
            links: vec![],
        };
        let names: Vec<String> = info.listing().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["ep1.mkv", "ep1.mkv (2)"]);
        assert_eq!(info.find_file("ep1.mkv (2)").map(|f| f.id), Some(2));
        assert!(info.find_file("sample.mkv").is_none());
        assert_eq!(info.to_item(Utc::now()).selected_files, Some(2));
    }
}
