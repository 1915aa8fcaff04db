//! WebDAV view of the torrent catalog, served by `dav_server` over a
//! read-only filesystem.

pub mod file;
pub mod handler;
pub mod stream;
pub mod tree;

pub use handler::DavService;
pub use tree::{DebridDavFs, Node};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Strong validator for one file: stable while id, size and mtime are.
/// Returned bare; the handler adds the quotes.
pub fn etag_for(torrent_id: &str, file_id: u64, size: u64, modified: DateTime<Utc>) -> String {
    let digest = Sha256::digest(format!(
        "{}:{}:{}:{}",
        torrent_id,
        file_id,
        size,
        modified.timestamp()
    ));
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}
