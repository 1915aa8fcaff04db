//! Download-link resolution with credential rotation and quarantines.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::api::{DebridClient, FallbackClient, RetryPolicy, TokenManager, FALLBACK_TOKEN};
use crate::cache::CacheTier;
use crate::error::{DebridDavError, DebridDavResult};
use crate::metrics::ApiMetrics;
use crate::types::{DownloadLink, TorrentInfo};

/// Reason recorded when a selected file has no restricted link to unrestrict.
pub const NO_LINKS_REASON: &str = "no_links";

/// Attempts across tokens for one unrestrict call.
const ROTATION_ATTEMPTS: u32 = 3;

pub struct LinkResolver {
    client: Arc<DebridClient>,
    tokens: Arc<TokenManager>,
    fallback: Option<FallbackClient>,
    caches: Arc<CacheTier>,
    metrics: Arc<ApiMetrics>,
    rotation: RetryPolicy,
}

impl LinkResolver {
    pub fn new(
        client: Arc<DebridClient>,
        tokens: Arc<TokenManager>,
        fallback: Option<FallbackClient>,
        caches: Arc<CacheTier>,
        metrics: Arc<ApiMetrics>,
    ) -> Self {
        Self {
            client,
            tokens,
            fallback,
            caches,
            metrics,
            rotation: RetryPolicy::immediate(ROTATION_ATTEMPTS),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Torrent detail, from the cache when complete or else from the remote.
    /// Quarantined torrents are reported as not found.
    pub async fn torrent_info(&self, torrent_id: &str) -> DebridDavResult<Arc<TorrentInfo>> {
        if let Some(entry) = self.caches.broken_torrent(torrent_id).await {
            return Err(DebridDavError::NotFound(format!(
                "torrent {} is quarantined ({})",
                torrent_id, entry.reason
            )));
        }
        if let Some(info) = self.caches.get_info(torrent_id).await {
            return Ok(info);
        }
        self.fetch_torrent_info(torrent_id).await
    }

    /// Fetch detail from the remote, ignoring any quarantine. A non-transient
    /// failure of this torrent-level call quarantines the torrent.
    #[instrument(skip(self), fields(torrent_id = %torrent_id))]
    pub async fn fetch_torrent_info(&self, torrent_id: &str) -> DebridDavResult<Arc<TorrentInfo>> {
        let token = self.tokens.primary()?;
        match self.client.get_torrent_info(&token, torrent_id).await {
            Ok(info) => {
                let info = Arc::new(info);
                self.caches.put_info(Arc::clone(&info)).await;
                Ok(info)
            }
            Err(e) => {
                if quarantines_torrent(&e) {
                    self.caches.quarantine_torrent(torrent_id, &e).await;
                } else {
                    debug!(torrent_id = %torrent_id, error = %e, "Torrent detail fetch failed");
                }
                Err(e)
            }
        }
    }

    /// Resolve one file to a playable URL.
    ///
    /// Concurrent callers for the same file share one resolution.
    pub async fn get_file_download_url(
        &self,
        torrent_id: &str,
        file_name: &str,
    ) -> DebridDavResult<DownloadLink> {
        if let Some(link) = self.caches.get_link(torrent_id, file_name).await {
            return Ok(link);
        }
        if let Some(entry) = self.caches.file_quarantine(torrent_id, file_name).await {
            return Err(DebridDavError::NotFound(format!(
                "{} is quarantined ({})",
                file_name, entry.reason
            )));
        }

        self.caches
            .link_or_resolve(torrent_id, file_name, self.resolve(torrent_id, file_name))
            .await
    }

    /// Resolve without consulting the link cache or the file quarantine.
    /// Used by repair to re-validate a file.
    pub async fn resolve_fresh(&self, info: &TorrentInfo, file_name: &str) -> DebridDavResult<DownloadLink> {
        self.caches.invalidate_link(&info.id, file_name).await;
        let link = self.resolve_in(info, file_name).await?;
        self.caches.put_link(link.clone()).await;
        Ok(link)
    }

    async fn resolve(&self, torrent_id: &str, file_name: &str) -> DebridDavResult<DownloadLink> {
        let info = self.torrent_info(torrent_id).await?;
        self.resolve_in(&info, file_name).await
    }

    #[instrument(skip(self, info), fields(torrent_id = %info.id, file = %file_name))]
    async fn resolve_in(&self, info: &TorrentInfo, file_name: &str) -> DebridDavResult<DownloadLink> {
        let torrent_id = info.id.as_str();
        let file = info.find_file(file_name).ok_or_else(|| {
            DebridDavError::NotFound(format!("{} in torrent {}", file_name, torrent_id))
        })?;

        let Some(restricted) = file.link.clone() else {
            let err = DebridDavError::ContentUnavailable {
                reason: NO_LINKS_REASON.to_string(),
                message: format!("no link for {}", file_name),
            };
            self.caches.quarantine_file(torrent_id, file_name, &err).await;
            return Err(err);
        };

        let result = self
            .rotation
            .run(
                "unrestrict_link",
                |attempt| self.unrestrict_with_current(torrent_id, file_name, &restricted, attempt),
                |e: &DebridDavError| matches!(e, DebridDavError::BandwidthLimited(_)),
            )
            .await;

        match result {
            Ok(link) => Ok(link),
            Err(e) if e.is_bandwidth_limit() => {
                if let Some(link) = self.try_fallback(info, file_name, &file.path).await {
                    return Ok(link);
                }
                if self.tokens.all_exhausted() {
                    warn!(torrent_id = %torrent_id, file = %file_name, "All tokens exhausted");
                    Err(DebridDavError::AllTokensExhausted)
                } else {
                    Err(e)
                }
            }
            Err(e) if !quarantines_file(&e) => Err(e),
            Err(e) => {
                self.caches.quarantine_file(torrent_id, file_name, &e).await;
                Err(e)
            }
        }
    }

    async fn unrestrict_with_current(
        &self,
        torrent_id: &str,
        file_name: &str,
        restricted: &str,
        attempt: u32,
    ) -> DebridDavResult<DownloadLink> {
        let token = self.tokens.current()?;
        match self.client.unrestrict_link(&token, restricted).await {
            Ok(resp) => {
                debug!(
                    torrent_id = %torrent_id,
                    file = %file_name,
                    attempt = attempt + 1,
                    "Resolved download link"
                );
                Ok(DownloadLink {
                    torrent_id: torrent_id.to_string(),
                    file_name: file_name.to_string(),
                    url: resp.download,
                    token,
                    auth_header: None,
                    filesize: Some(resp.filesize),
                    mime_type: resp.mime_type,
                    resolved_at: Utc::now(),
                })
            }
            Err(e) if e.is_bandwidth_limit() => {
                self.on_bandwidth_limit(&token).await;
                self.caches.invalidate_link(torrent_id, file_name).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn on_bandwidth_limit(&self, token: &str) {
        self.tokens.mark_exhausted(token);
        self.metrics.record_token_rotation();
        self.caches.invalidate_links_for_token(token);
    }

    async fn try_fallback(&self, info: &TorrentInfo, file_name: &str, file_path: &str) -> Option<DownloadLink> {
        let fallback = self.fallback.as_ref()?;
        match fallback
            .resolve(&info.id, &info.filename, file_name, file_path)
            .await
        {
            Ok(link) => {
                info!(torrent_id = %info.id, file = %file_name, "Serving through fallback endpoint");
                self.metrics.record_fallback();
                Some(link)
            }
            Err(e) => {
                warn!(torrent_id = %info.id, file = %file_name, error = %e, "Fallback resolution failed");
                None
            }
        }
    }

    /// React to an upstream status seen while opening `link`.
    pub async fn report_stream_failure(&self, link: &DownloadLink, status: u16) {
        match status {
            403 | 404 | 410 => {
                debug!(
                    torrent_id = %link.torrent_id,
                    file = %link.file_name,
                    status = status,
                    "Dropping stale download link"
                );
                self.caches
                    .invalidate_link(&link.torrent_id, &link.file_name)
                    .await;
            }
            503 | 509 => {
                self.caches
                    .invalidate_link(&link.torrent_id, &link.file_name)
                    .await;
                if link.token != FALLBACK_TOKEN {
                    self.metrics.record_bandwidth_limit();
                    self.on_bandwidth_limit(&link.token).await;
                }
            }
            _ => {}
        }
    }
}

/// Failures that say something about the content rather than about the
/// network, the token or our own configuration.
fn is_content_failure(err: &DebridDavError) -> bool {
    !(err.is_transient()
        || err.is_bandwidth_limit()
        || matches!(
            err,
            DebridDavError::Configuration(_)
                | DebridDavError::PermissionDenied(_)
                | DebridDavError::ClientDisconnected(_)
        ))
}

/// Whether a failed torrent-detail fetch marks the whole torrent broken.
fn quarantines_torrent(err: &DebridDavError) -> bool {
    is_content_failure(err)
}

/// Whether a failed unrestrict marks the file broken.
fn quarantines_file(err: &DebridDavError) -> bool {
    is_content_failure(err)
}
