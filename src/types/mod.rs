//! Core data types for torrents, files, resolved links, quarantines and repairs.

pub mod file;
pub mod link;
pub mod repair;
pub mod torrent;

pub use file::TorrentFile;
pub use link::{BrokenTorrentEntry, DavCacheEntry, DownloadLink, FailedFileEntry};
pub use repair::{RepairEntry, RepairStatus, NOT_CACHED_PREFIX};
pub use torrent::{TorrentInfo, TorrentItem};
