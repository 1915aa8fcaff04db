//! Background repair: a scanner that flags broken torrents, a durable queue,
//! and workers that re-validate each queued torrent.

pub mod queue;

pub use queue::RepairQueue;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::CacheTier;
use crate::config::RepairConfig;
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::catalog::TorrentCatalog;
use crate::fs::resolver::{LinkResolver, NO_LINKS_REASON};
use crate::store::{run_blocking, RepairFilter, RepairStore};
use crate::types::{RepairEntry, RepairStatus, TorrentItem, NOT_CACHED_PREFIX};

/// Reason recorded when the provider no longer knows the torrent.
pub const REMOVED_REASON: &str = "not_cached_removed";
/// Reason recorded on operator-forced repairs.
pub const FORCED_REASON: &str = "forced";

/// How long `stop` waits for workers to wind down before aborting them.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Result of one full scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scanned: usize,
    pub queued: usize,
    /// Broken torrents that could not be queued because the queue was full
    pub dropped: usize,
}

/// Snapshot served by the repair status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RepairStatusReport {
    pub enabled: bool,
    pub running: bool,
    pub scan_running: bool,
    pub queue_len: usize,
    pub queue_capacity: usize,
    pub counts: BTreeMap<String, u64>,
    pub fixed: u64,
    pub still_broken: u64,
    pub not_cached: u64,
    pub last_scan: Option<ScanReport>,
}

/// Resets the scan flag when a scan ends, however it ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Releases a popped id from the queue when its repair ends, however it ends.
struct PendingGuard<'a> {
    queue: &'a RepairQueue,
    torrent_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish(self.torrent_id);
    }
}

pub struct RepairManager {
    catalog: Arc<TorrentCatalog>,
    resolver: Arc<LinkResolver>,
    caches: Arc<CacheTier>,
    store: Arc<dyn RepairStore>,
    queue: Arc<RepairQueue>,
    config: RepairConfig,
    scan_running: AtomicBool,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    last_scan: RwLock<Option<ScanReport>>,
    fixed: AtomicU64,
    still_broken: AtomicU64,
    not_cached: AtomicU64,
}

impl RepairManager {
    pub fn new(
        config: RepairConfig,
        catalog: Arc<TorrentCatalog>,
        resolver: Arc<LinkResolver>,
        caches: Arc<CacheTier>,
        store: Arc<dyn RepairStore>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(RepairQueue::new(config.queue_capacity)),
            catalog,
            resolver,
            caches,
            store,
            config,
            scan_running: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
            last_scan: RwLock::new(None),
            fixed: AtomicU64::new(0),
            still_broken: AtomicU64::new(0),
            not_cached: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_scan_running(&self) -> bool {
        self.scan_running.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &Arc<RepairQueue> {
        &self.queue
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the workers and the periodic scanner. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_tx.send_replace(false);

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for worker in 0..self.config.workers.max(1) {
            tasks.push(self.spawn_worker(worker));
        }
        if self.config.scan_interval_secs > 0 {
            tasks.push(self.spawn_scanner(Duration::from_secs(self.config.scan_interval_secs)));
        }
        info!(
            workers = self.config.workers.max(1),
            scan_interval_secs = self.config.scan_interval_secs,
            "Repair started"
        );
    }

    /// Stop workers and the scanner. A repair in flight is interrupted and
    /// its entry goes back to `queued`, so a later start picks it up again.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for mut task in tasks {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                warn!("Repair task did not stop in time; aborting");
                task.abort();
                let _ = task.await;
            }
        }
        info!("Repair stopped");
    }

    fn spawn_worker(self: &Arc<Self>, worker: usize) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = stop.changed() => break,
                    next = manager.queue.pop() => next,
                };
                let Some(torrent_id) = next else { break };
                debug!(worker = worker, torrent_id = %torrent_id, "Repair worker picked torrent");
                let _pending = PendingGuard {
                    queue: &manager.queue,
                    torrent_id: &torrent_id,
                };
                tokio::select! {
                    result = manager.repair_torrent(&torrent_id) => {
                        if let Err(e) = result {
                            warn!(torrent_id = %torrent_id, error = %e, "Repair failed");
                        }
                    }
                    _ = stop.changed() => {
                        manager.requeue_interrupted(&torrent_id).await;
                        break;
                    }
                }
            }
        })
    }

    /// Put an entry cut off by `stop` back to `queued`.
    async fn requeue_interrupted(&self, torrent_id: &str) {
        let id = torrent_id.to_string();
        let result = run_blocking(&self.store, move |store| {
            if let Some(mut entry) = store.get_entry(&id)? {
                if entry.status == RepairStatus::Running {
                    entry.status = RepairStatus::Queued;
                    entry.updated_at = Utc::now();
                    store.upsert_entry(&entry)?;
                }
            }
            Ok(())
        })
        .await;
        match result {
            Ok(()) => info!(torrent_id = %torrent_id, "Repair interrupted by stop; left queued"),
            Err(e) => error!(torrent_id = %torrent_id, error = %e, "Failed to requeue interrupted repair"),
        }
    }

    fn spawn_scanner(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut stop = self.stop_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately; leave startup to the refresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.scan().await {
                            debug!(error = %e, "Scheduled repair scan skipped");
                        }
                    }
                }
            }
        })
    }

    /// Re-queue entries a previous run left queued or running.
    pub async fn rehydrate(&self) -> DebridDavResult<usize> {
        let mut requeued = 0;
        let entries = run_blocking(&self.store, |store| store.list_entries(&RepairFilter::new())).await?;
        for entry in entries {
            if !entry.status.is_pending() {
                continue;
            }
            if self.queue.push(&entry.torrent_id)? {
                let entry = RepairEntry {
                    status: RepairStatus::Queued,
                    updated_at: Utc::now(),
                    ..entry
                };
                self.save(entry).await?;
                requeued += 1;
            }
        }
        if requeued > 0 {
            info!(requeued = requeued, "Restored pending repairs");
        }
        Ok(requeued)
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Why `item` looks broken, if it does.
    pub async fn judge(&self, item: &TorrentItem) -> Option<String> {
        if item.is_error_status() {
            return Some(format!("status_{}", item.status));
        }
        if let Some(selected) = item.selected_files {
            if item.is_complete() && item.links.len() < selected {
                return Some(NO_LINKS_REASON.to_string());
            }
        }
        if let Some(entry) = self.caches.broken_torrent(&item.id).await {
            return Some(entry.reason);
        }
        let quarantined = self.caches.quarantined_files_for(&item.id);
        if let Some(first) = quarantined.first() {
            return self
                .caches
                .file_quarantine(&item.id, first)
                .await
                .map(|entry| entry.reason);
        }
        None
    }

    /// Walk the catalog and queue every torrent that looks broken.
    /// Only one scan runs at a time.
    #[instrument(skip(self))]
    pub async fn scan(&self) -> DebridDavResult<ScanReport> {
        if self
            .scan_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DebridDavError::InvalidArgument(
                "a repair scan is already running".to_string(),
            ));
        }
        let _guard = ScanGuard(&self.scan_running);

        let started_at = Utc::now();
        let items = self.catalog.list();
        let mut queued = 0;
        let mut dropped = 0;

        for item in &items {
            let Some(reason) = self.judge(item).await else {
                continue;
            };
            if let Some(existing) = self.load(&item.id).await? {
                if existing.status == RepairStatus::NotCached || existing.status.is_pending() {
                    continue;
                }
            }
            match self.enqueue(item.id.as_str(), Some(item), &reason).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(DebridDavError::QueueFull(_)) => dropped += 1,
                Err(e) => return Err(e),
            }
        }

        let report = ScanReport {
            started_at,
            finished_at: Utc::now(),
            scanned: items.len(),
            queued,
            dropped,
        };
        info!(
            scanned = report.scanned,
            queued = report.queued,
            dropped = report.dropped,
            "Repair scan finished"
        );
        *self.last_scan.write().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        Ok(report)
    }

    async fn load(&self, torrent_id: &str) -> DebridDavResult<Option<RepairEntry>> {
        let id = torrent_id.to_string();
        run_blocking(&self.store, move |store| store.get_entry(&id)).await
    }

    async fn save(&self, entry: RepairEntry) -> DebridDavResult<()> {
        run_blocking(&self.store, move |store| store.upsert_entry(&entry)).await
    }

    async fn enqueue(
        &self,
        torrent_id: &str,
        item: Option<&TorrentItem>,
        reason: &str,
    ) -> DebridDavResult<bool> {
        if !self.queue.push(torrent_id)? {
            return Ok(false);
        }
        let existing = match item {
            Some(_) => None,
            None => match self.load(torrent_id).await {
                Ok(existing) => existing,
                Err(e) => {
                    self.queue.finish(torrent_id);
                    return Err(e);
                }
            },
        };
        let entry = match item {
            Some(item) => RepairEntry::queued(&item.id, &item.filename, &item.hash, reason),
            None => match existing {
                Some(existing) => RepairEntry::queued(
                    torrent_id,
                    existing.filename,
                    existing.hash,
                    reason,
                ),
                None => RepairEntry::queued(torrent_id, torrent_id, "", reason),
            },
        };
        if let Err(e) = self.save(entry).await {
            self.queue.finish(torrent_id);
            return Err(e);
        }
        debug!(torrent_id = torrent_id, reason = reason, "Queued for repair");
        Ok(true)
    }

    /// Queue one torrent from the catalog.
    pub async fn queue_torrent(&self, torrent_id: &str, reason: &str) -> DebridDavResult<bool> {
        let item = self.catalog.get_by_id(torrent_id);
        self.enqueue(torrent_id, item.as_ref(), reason).await
    }

    /// Queue every recorded entry that is not fixed. Not-cached entries are
    /// skipped unless `include_not_cached` is set. A full queue ends the pass
    /// early; the count queued so far is returned and the rest wait for the
    /// next call.
    pub async fn repair_all(&self, include_not_cached: bool) -> DebridDavResult<usize> {
        let entries = run_blocking(&self.store, |store| store.list_entries(&RepairFilter::new())).await?;
        let eligible: Vec<RepairEntry> = entries
            .into_iter()
            .filter(|e| e.status != RepairStatus::Fixed)
            .filter(|e| include_not_cached || !e.is_not_cached())
            .collect();

        let mut queued = 0;
        for (done, entry) in eligible.iter().enumerate() {
            let item = self.catalog.get_by_id(&entry.torrent_id);
            match self.enqueue(&entry.torrent_id, item.as_ref(), &entry.reason).await {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(DebridDavError::QueueFull(_)) => {
                    warn!(
                        queued = queued,
                        skipped = eligible.len() - done,
                        "Repair queue full; remaining entries not queued"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        info!(queued = queued, include_not_cached = include_not_cached, "Repair-all queued");
        Ok(queued)
    }

    pub async fn repair_all_except_not_cached(&self) -> DebridDavResult<usize> {
        self.repair_all(false).await
    }

    /// Queue specific torrents regardless of their previous outcome.
    pub async fn force_repair(&self, torrent_ids: &[String]) -> DebridDavResult<usize> {
        let mut queued = 0;
        for id in torrent_ids {
            if self.queue_torrent(id, FORCED_REASON).await? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    // =========================================================================
    // Repairing
    // =========================================================================

    /// Re-validate one torrent and record the outcome.
    #[instrument(skip(self), fields(torrent_id = %torrent_id))]
    pub async fn repair_torrent(&self, torrent_id: &str) -> DebridDavResult<RepairEntry> {
        let mut entry = match self.load(torrent_id).await? {
            Some(entry) => entry,
            None => {
                let item = self.catalog.get_by_id(torrent_id);
                let (filename, hash) = item
                    .map(|i| (i.filename, i.hash))
                    .unwrap_or_else(|| (torrent_id.to_string(), String::new()));
                RepairEntry::queued(torrent_id, filename, hash, FORCED_REASON)
            }
        };
        entry.status = RepairStatus::Running;
        entry.progress = 0.0;
        entry.updated_at = Utc::now();
        self.save(entry.clone()).await?;

        let (status, reason) = self.revalidate(&mut entry).await?;
        entry.status = status;
        entry.reason = reason;
        entry.updated_at = Utc::now();
        if status == RepairStatus::Fixed {
            entry.progress = 100.0;
        }
        self.save(entry.clone()).await?;

        let counter = match status {
            RepairStatus::Fixed => &self.fixed,
            RepairStatus::NotCached => &self.not_cached,
            _ => &self.still_broken,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        info!(
            torrent_id = %torrent_id,
            status = %entry.status,
            reason = %entry.reason,
            "Repair finished"
        );
        Ok(entry)
    }

    async fn revalidate(&self, entry: &mut RepairEntry) -> DebridDavResult<(RepairStatus, String)> {
        let torrent_id = entry.torrent_id.clone();

        let info = match self.resolver.fetch_torrent_info(&torrent_id).await {
            Ok(info) => info,
            Err(DebridDavError::NotFound(_)) => {
                warn!(torrent_id = %torrent_id, "Torrent no longer exists remotely");
                self.catalog.remove_by_id(&torrent_id);
                self.caches.invalidate_torrent(&torrent_id).await;
                return Ok((RepairStatus::NotCached, REMOVED_REASON.to_string()));
            }
            Err(e) if e.is_not_cached() => return Ok((RepairStatus::NotCached, e.reason())),
            Err(e) => return Ok((RepairStatus::StillBroken, e.reason())),
        };
        self.caches.clear_torrent(&torrent_id).await;
        entry.filename = info.filename.clone();
        entry.hash = info.hash.clone();

        let remote = info.to_item(Utc::now());
        if remote.is_error_status() {
            return Ok((RepairStatus::StillBroken, format!("status_{}", info.status)));
        }

        let listing = info.listing();
        if listing.is_empty() {
            return Ok((RepairStatus::StillBroken, NO_LINKS_REASON.to_string()));
        }

        let total = listing.len();
        let mut failures: Vec<DebridDavError> = Vec::new();
        for (done, (name, _file)) in listing.iter().enumerate() {
            match self.resolver.resolve_fresh(&info, name).await {
                Ok(_) => self.caches.clear_file(&torrent_id, name).await,
                Err(e) if e.is_bandwidth_limit() => {
                    // Says nothing about the content; try again later.
                    return Ok((RepairStatus::StillBroken, e.reason()));
                }
                Err(e) => {
                    debug!(torrent_id = %torrent_id, file = %name, error = %e, "File still broken");
                    failures.push(e);
                }
            }
            entry.progress = ((done + 1) as f64 / total as f64) * 100.0;
            entry.updated_at = Utc::now();
            if let Err(e) = self.save(entry.clone()).await {
                error!(torrent_id = %torrent_id, error = %e, "Failed to record repair progress");
            }
        }

        if self.catalog.contains_id(&torrent_id) {
            self.catalog.upsert(remote);
        }

        Ok(match failures.first() {
            None => (RepairStatus::Fixed, String::new()),
            Some(_) if failures.iter().all(DebridDavError::is_not_cached) => {
                (RepairStatus::NotCached, failures[0].reason())
            }
            Some(first) => {
                let reason = failures
                    .iter()
                    .find(|e| !e.is_not_cached())
                    .unwrap_or(first)
                    .reason();
                (RepairStatus::StillBroken, reason)
            }
        })
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    pub async fn entries(&self, filter: RepairFilter) -> DebridDavResult<Vec<RepairEntry>> {
        run_blocking(&self.store, move |store| store.list_entries(&filter)).await
    }

    pub async fn status(&self) -> DebridDavResult<RepairStatusReport> {
        let counts = run_blocking(&self.store, |store| store.status_counts()).await?;
        Ok(RepairStatusReport {
            enabled: self.config.enabled,
            running: self.is_running(),
            scan_running: self.is_scan_running(),
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            counts,
            fixed: self.fixed.load(Ordering::Relaxed),
            still_broken: self.still_broken.load(Ordering::Relaxed),
            not_cached: self.not_cached.load(Ordering::Relaxed),
            last_scan: self
                .last_scan
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        })
    }
}

/// Whether `reason` marks content the provider can never serve.
pub fn is_not_cached_reason(reason: &str) -> bool {
    reason.starts_with(NOT_CACHED_PREFIX)
}
