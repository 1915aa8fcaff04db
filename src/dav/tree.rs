//! The WebDAV tree: `/`, the all-torrents collection, one collection per
//! torrent and its visible files.

use chrono::{DateTime, Utc};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError, FsFuture, FsResult, FsStream,
    OpenOptions, ReadDirMeta,
};
use futures::{stream, FutureExt};
use sha2::{Digest, Sha256};
use std::path::Component;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, instrument, trace};

use super::etag_for;
use super::file::RemoteFile;
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::DebridFs;
use crate::types::{TorrentFile, TorrentItem};

/// Where a request path lands in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Root,
    All,
    Torrent(String),
    File { torrent: String, file: String },
}

impl Node {
    /// Map a decoded request path onto the tree. Anything outside it is
    /// `NotFound`.
    pub fn locate(path: &DavPath, all_dir: &str) -> FsResult<Node> {
        let mut parts = Vec::new();
        for component in path.as_rel_ospath().components() {
            match component {
                Component::Normal(part) => {
                    parts.push(part.to_str().ok_or(FsError::NotFound)?.to_string())
                }
                Component::CurDir | Component::RootDir => {}
                _ => return Err(FsError::NotFound),
            }
        }

        match parts.as_slice() {
            [] => Ok(Node::Root),
            [top, ..] if top.as_str() != all_dir => {
                trace!(top = %top, "Path outside the tree");
                Err(FsError::NotFound)
            }
            [_] => Ok(Node::All),
            [_, torrent] => Ok(Node::Torrent(torrent.clone())),
            [_, torrent, file] => Ok(Node::File {
                torrent: torrent.clone(),
                file: file.clone(),
            }),
            _ => Err(FsError::NotFound),
        }
    }

    pub fn is_collection(&self) -> bool {
        !matches!(self, Node::File { .. })
    }
}

/// Properties of one node as the WebDAV handler sees them.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    len: u64,
    dir: bool,
    created: SystemTime,
    modified: SystemTime,
    etag: Option<String>,
}

impl EntryMeta {
    fn collection(created: DateTime<Utc>, modified: DateTime<Utc>) -> Self {
        Self {
            len: 0,
            dir: true,
            created: created.into(),
            modified: modified.into(),
            etag: None,
        }
    }

    fn file(item: &TorrentItem, file: &TorrentFile) -> Self {
        let modified = item.modified();
        Self {
            len: file.bytes,
            dir: false,
            created: item.created().into(),
            modified: modified.into(),
            etag: Some(etag_for(&item.id, file.id, file.bytes, modified)),
        }
    }
}

impl DavMetaData for EntryMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> FsResult<SystemTime> {
        Ok(self.modified)
    }

    fn created(&self) -> FsResult<SystemTime> {
        Ok(self.created)
    }

    fn is_dir(&self) -> bool {
        self.dir
    }

    fn etag(&self) -> Option<String> {
        // Collections fall back to the handler's own validator.
        self.etag.clone()
    }
}

struct Entry {
    name: String,
    meta: EntryMeta,
}

impl DavDirEntry for Entry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }
}

/// Read-only [`DavFileSystem`] over the torrent catalog.
#[derive(Clone)]
pub struct DebridDavFs {
    fs: Arc<DebridFs>,
}

impl DebridDavFs {
    pub fn new(fs: Arc<DebridFs>) -> Self {
        Self { fs }
    }

    pub fn locate(&self, path: &DavPath) -> FsResult<Node> {
        Node::locate(path, &self.fs.config().server.all_dir)
    }

    /// Catalog entry behind a torrent name. Quarantined torrents are absent.
    pub fn lookup_torrent(&self, name: &str) -> DebridDavResult<TorrentItem> {
        let item = self
            .fs
            .catalog()
            .get(name)
            .ok_or_else(|| DebridDavError::NotFound(name.to_string()))?;
        if self.fs.caches().is_torrent_broken(&item.id) {
            return Err(DebridDavError::NotFound(format!("{} is quarantined", name)));
        }
        Ok(item)
    }

    pub async fn lookup_file(
        &self,
        torrent: &str,
        file: &str,
    ) -> DebridDavResult<(TorrentItem, TorrentFile)> {
        let item = self.lookup_torrent(torrent)?;
        self.fs.ensure_remote()?;
        let info = self.fs.resolver().torrent_info(&item.id).await?;
        if self.fs.caches().is_file_quarantined(&item.id, file) {
            return Err(DebridDavError::NotFound(format!("{} is quarantined", file)));
        }
        let found = info
            .find_file(file)
            .cloned()
            .ok_or_else(|| DebridDavError::NotFound(format!("{}/{}", torrent, file)))?;
        Ok((item, found))
    }

    /// Visible files of a torrent, memoized under its listing signature.
    async fn torrent_files(&self, item: &TorrentItem) -> DebridDavResult<Arc<Vec<(String, TorrentFile)>>> {
        let caches = self.fs.caches();
        let key = listing_key(item, &caches.quarantined_files_for(&item.id));
        if let Some(files) = caches.get_dav(&item.id, &key).await {
            self.fs.metrics().dav.record_memo_hit();
            return Ok(files);
        }

        self.fs.ensure_remote()?;
        let info = self.fs.resolver().torrent_info(&item.id).await?;
        let files: Vec<(String, TorrentFile)> = info
            .listing()
            .into_iter()
            .filter(|(name, _)| !caches.is_file_quarantined(&info.id, name))
            .map(|(name, file)| (name, file.clone()))
            .collect();
        debug!(torrent_id = %item.id, files = files.len(), "Listing collected");
        let files = Arc::new(files);
        caches.put_dav(&item.id, key, Arc::clone(&files)).await;
        Ok(files)
    }

    fn latest_modified(&self) -> DateTime<Utc> {
        self.fs
            .catalog()
            .list()
            .iter()
            .map(TorrentItem::modified)
            .max()
            .unwrap_or_else(Utc::now)
    }

    async fn node_meta(&self, node: Node) -> DebridDavResult<EntryMeta> {
        Ok(match node {
            Node::Root => {
                let now = Utc::now();
                EntryMeta::collection(now, now)
            }
            Node::All => {
                let latest = self.latest_modified();
                EntryMeta::collection(latest, latest)
            }
            Node::Torrent(name) => {
                let item = self.lookup_torrent(&name)?;
                EntryMeta::collection(item.created(), item.modified())
            }
            Node::File { torrent, file } => {
                let (item, found) = self.lookup_file(&torrent, &file).await?;
                EntryMeta::file(&item, &found)
            }
        })
    }

    async fn children(&self, node: Node) -> DebridDavResult<Vec<Entry>> {
        Ok(match node {
            Node::Root => {
                let latest = self.latest_modified();
                vec![Entry {
                    name: self.fs.config().server.all_dir.clone(),
                    meta: EntryMeta::collection(latest, latest),
                }]
            }
            Node::All => self
                .fs
                .catalog()
                .list()
                .into_iter()
                .filter(|item| !self.fs.caches().is_torrent_broken(&item.id))
                .map(|item| Entry {
                    meta: EntryMeta::collection(item.created(), item.modified()),
                    name: item.name,
                })
                .collect(),
            Node::Torrent(name) => {
                let item = self.lookup_torrent(&name)?;
                self.torrent_files(&item)
                    .await?
                    .iter()
                    .map(|(name, file)| Entry {
                        name: name.clone(),
                        meta: EntryMeta::file(&item, file),
                    })
                    .collect()
            }
            Node::File { .. } => {
                return Err(DebridDavError::InvalidArgument("not a collection".to_string()))
            }
        })
    }
}

/// Memo key for a torrent listing. Any change in times, file count or
/// quarantined files gives a new key.
fn listing_key(item: &TorrentItem, quarantined: &[String]) -> String {
    let signature = format!(
        "{}:{}:{}:{}:{}",
        item.id,
        item.created().timestamp(),
        item.modified().timestamp(),
        item.selected_files.unwrap_or(item.links.len()),
        quarantined.join("\u{1f}")
    );
    Sha256::digest(signature.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn rejected(op: &str, err: DebridDavError) -> FsError {
    debug!(dav_op = op, error = %err, "Lookup failed");
    err.to_fs_error()
}

impl DavFileSystem for DebridDavFs {
    #[instrument(level = "debug", skip(self, options), fields(path = %path.as_url_string()))]
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        async move {
            if options.write || options.create || options.create_new || options.truncate {
                return Err(FsError::Forbidden);
            }
            let Node::File { torrent, file } = self.locate(path)? else {
                return Err(FsError::Forbidden);
            };
            let (item, found) = self
                .lookup_file(&torrent, &file)
                .await
                .map_err(|e| rejected("open", e))?;
            let meta = EntryMeta::file(&item, &found);
            Ok(Box::new(RemoteFile::new(Arc::clone(&self.fs), item.id, file, meta)) as Box<dyn DavFile>)
        }
        .boxed()
    }

    #[instrument(level = "debug", skip(self, _meta), fields(path = %path.as_url_string()))]
    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        async move {
            let node = self.locate(path)?;
            let entries = self.children(node).await.map_err(|e| rejected("read_dir", e))?;
            trace!(count = entries.len(), "Directory entries");
            let entries: Vec<Box<dyn DavDirEntry>> = entries
                .into_iter()
                .map(|e| Box::new(e) as Box<dyn DavDirEntry>)
                .collect();
            Ok(Box::pin(stream::iter(entries.into_iter().map(Ok))) as FsStream<_>)
        }
        .boxed()
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        async move {
            let node = self.locate(path)?;
            let meta = self.node_meta(node).await.map_err(|e| rejected("metadata", e))?;
            Ok(Box::new(meta) as Box<dyn DavMetaData>)
        }
        .boxed()
    }
}
