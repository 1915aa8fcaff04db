use serde::{Deserialize, Serialize};

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentFile {
    pub id: u64,
    /// Path relative to the torrent root, as reported by the provider
    pub path: String,
    pub bytes: u64,
    pub selected: bool,
    /// Restricted provider link, present only for selected files
    pub link: Option<String>,
}

impl TorrentFile {
    pub fn new(id: u64, path: impl Into<String>, bytes: u64, selected: bool) -> Self {
        Self {
            id,
            path: path.into(),
            bytes,
            selected,
            link: None,
        }
    }

    pub fn base_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.path)
    }
}
