//! A torrent file opened for reading through its download link.

use bytes::Bytes;
use dav_server::fs::{DavFile, DavMetaData, FsError, FsFuture};
use futures::FutureExt;
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::{debug, warn};

use super::stream::{is_disconnect_error, ProxyStream};
use super::tree::EntryMeta;
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::DebridFs;

/// Upstream statuses that mean the link went stale or was throttled.
const RETRY_STATUSES: [u16; 5] = [403, 404, 410, 503, 509];

/// Seekable read handle. The upstream is contacted on the first read, so
/// `HEAD` and conditional `GET` never open a download.
pub struct RemoteFile {
    fs: Arc<DebridFs>,
    torrent_id: String,
    name: String,
    meta: EntryMeta,
    pos: u64,
    body: Option<ProxyStream>,
    sent: u64,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("torrent_id", &self.torrent_id)
            .field("name", &self.name)
            .field("pos", &self.pos)
            .field("open", &self.body.is_some())
            .finish()
    }
}

impl RemoteFile {
    pub fn new(fs: Arc<DebridFs>, torrent_id: String, name: String, meta: EntryMeta) -> Self {
        Self {
            fs,
            torrent_id,
            name,
            meta,
            pos: 0,
            body: None,
            sent: 0,
        }
    }

    /// Open the upstream body at `offset`. A stale or throttled link is
    /// reported and re-resolved once before giving up.
    async fn open_at(&self, offset: u64) -> DebridDavResult<ProxyStream> {
        let range = (offset > 0).then(|| format!("bytes={}-", offset));
        let mut retried = false;
        loop {
            let link = self
                .fs
                .resolver()
                .get_file_download_url(&self.torrent_id, &self.name)
                .await?;
            let upstream = self
                .fs
                .client()
                .open_stream(&link.url, range.as_deref(), link.auth_header.as_deref())
                .await?;
            let status = upstream.status();

            if status == reqwest::StatusCode::PARTIAL_CONTENT {
                return Ok(ProxyStream::new(upstream.bytes_stream()));
            }
            if status.is_success() {
                if offset > 0 {
                    debug!(file = %self.name, offset = offset, "Upstream ignored Range; skipping ahead");
                }
                return Ok(ProxyStream::new(upstream.bytes_stream()).skipping(offset));
            }

            let code = status.as_u16();
            self.fs.resolver().report_stream_failure(&link, code).await;
            if !retried && RETRY_STATUSES.contains(&code) {
                debug!(torrent_id = %self.torrent_id, file = %self.name, status = code, "Retrying with a fresh link");
                retried = true;
                continue;
            }
            warn!(torrent_id = %self.torrent_id, file = %self.name, status = code, "Upstream refused download");
            return Err(match code {
                503 | 509 => DebridDavError::BandwidthLimited(format!("upstream answered {}", code)),
                _ => DebridDavError::ApiError {
                    status: 502,
                    message: format!("upstream answered {}", code),
                },
            });
        }
    }
}

impl DavFile for RemoteFile {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) }.boxed()
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        async move {
            if self.pos >= self.meta.len() {
                return Ok(Bytes::new());
            }
            let body = match self.body.take() {
                Some(body) => body,
                None => self.open_at(self.pos).await.map_err(|e| e.to_fs_error())?,
            };
            let body = self.body.insert(body);

            let max = count.min(self.fs.config().stream.buffer_size);
            match body.read(max).await {
                Ok(chunk) => {
                    let n = chunk.len() as u64;
                    self.pos += n;
                    self.sent += n;
                    self.fs.metrics().dav.record_bytes(n);
                    Ok(chunk)
                }
                Err(e) => {
                    self.body = None;
                    let metrics = &self.fs.metrics().dav;
                    if is_disconnect_error(&e) {
                        metrics.record_client_disconnect();
                        debug!(file = %self.name, bytes = self.sent, error = %e, "Stream interrupted");
                    } else {
                        metrics.record_stream_error();
                        warn!(file = %self.name, bytes = self.sent, error = %e, "Upstream stream failed");
                    }
                    Err(FsError::GeneralFailure)
                }
            }
        }
        .boxed()
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        let size = self.meta.len();
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => size.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };
        let result = match target {
            Some(target) => {
                if target != self.pos {
                    // The open body no longer lines up; reopen on the next read.
                    self.body = None;
                    self.pos = target;
                }
                Ok(target)
            }
            None => Err(FsError::GeneralFailure),
        };
        async move { result }.boxed()
    }

    fn write_buf(&mut self, _buf: Box<dyn bytes::Buf + Send>) -> FsFuture<'_, ()> {
        async { Err(FsError::Forbidden) }.boxed()
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        async { Err(FsError::Forbidden) }.boxed()
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        async { Ok(()) }.boxed()
    }
}

impl Drop for RemoteFile {
    fn drop(&mut self) {
        if self.sent == 0 {
            return;
        }
        if self.pos >= self.meta.len() {
            debug!(file = %self.name, bytes = self.sent, "Stream complete");
        } else {
            debug!(file = %self.name, bytes = self.sent, offset = self.pos, "Stream closed before end of file");
        }
    }
}
