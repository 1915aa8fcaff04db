use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{DebridClient, FallbackClient, TokenManager};
use crate::cache::CacheTier;
use crate::config::Config;
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::catalog::TorrentCatalog;
use crate::fs::resolver::LinkResolver;
use crate::metrics::Metrics;
use crate::repair::RepairManager;
use crate::store::{run_blocking, RepairStore, SqliteRepairStore};
use crate::types::TorrentItem;

/// Outcome of the most recent catalog refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub at: DateTime<Utc>,
    pub total: usize,
    pub added: usize,
    pub removed: usize,
    /// The remote answered with an empty list and the catalog was kept
    pub ignored_empty: bool,
    pub error: Option<String>,
}

/// Refresh control state served by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshInfo {
    pub interval_secs: u64,
    pub last: Option<RefreshStatus>,
}

/// The virtual filesystem: catalog, caches, resolver, repair and the
/// background refresh loop, owned by one value with an explicit lifecycle.
///
/// Build it with [`DebridFs::new`], call [`DebridFs::start`] once the runtime
/// is up, and [`DebridFs::shutdown`] before exiting.
pub struct DebridFs {
    config: Config,
    client: Arc<DebridClient>,
    tokens: Arc<TokenManager>,
    catalog: Arc<TorrentCatalog>,
    caches: Arc<CacheTier>,
    resolver: Arc<LinkResolver>,
    store: Arc<dyn RepairStore>,
    repair: Arc<RepairManager>,
    metrics: Arc<Metrics>,
    refresh_interval: AtomicU64,
    refresh_trigger: Notify,
    refresh_lock: tokio::sync::Mutex<()>,
    last_refresh: RwLock<Option<RefreshStatus>>,
    shutdown_tx: watch::Sender<bool>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl DebridFs {
    pub fn new(
        config: Config,
        store: Arc<dyn RepairStore>,
        metrics: Arc<Metrics>,
    ) -> DebridDavResult<Self> {
        let client = Arc::new(DebridClient::from_config(
            &config,
            Some(Arc::clone(&metrics.api)),
        )?);
        let tokens = Arc::new(TokenManager::new(
            config.api.tokens.clone(),
            Duration::from_secs(config.api.token_reset_secs),
        ));
        let fallback =
            FallbackClient::from_config(&config.fallback, Duration::from_secs(config.api.timeout_secs))?;
        let catalog = Arc::new(TorrentCatalog::new());
        let caches = Arc::new(CacheTier::new(&config.cache));
        let resolver = Arc::new(LinkResolver::new(
            Arc::clone(&client),
            Arc::clone(&tokens),
            fallback,
            Arc::clone(&caches),
            Arc::clone(&metrics.api),
        ));
        let repair = Arc::new(RepairManager::new(
            config.repair.clone(),
            Arc::clone(&catalog),
            Arc::clone(&resolver),
            Arc::clone(&caches),
            Arc::clone(&store),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            refresh_interval: AtomicU64::new(config.refresh.interval_secs),
            config,
            client,
            tokens,
            catalog,
            caches,
            resolver,
            store,
            repair,
            metrics,
            refresh_trigger: Notify::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
            last_refresh: RwLock::new(None),
            shutdown_tx,
            refresh_task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Build with the on-disk store named by `repair.database_path`.
    pub fn from_config(config: Config, metrics: Arc<Metrics>) -> DebridDavResult<Self> {
        let store = Arc::new(SqliteRepairStore::new(&config.repair.database_path)?);
        Self::new(config, store, metrics)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &Arc<DebridClient> {
        &self.client
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn catalog(&self) -> &Arc<TorrentCatalog> {
        &self.catalog
    }

    pub fn caches(&self) -> &Arc<CacheTier> {
        &self.caches
    }

    pub fn resolver(&self) -> &Arc<LinkResolver> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<dyn RepairStore> {
        &self.store
    }

    pub fn repair(&self) -> &Arc<RepairManager> {
        &self.repair
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Reject work that needs the remote when it is disabled or has no token.
    pub fn ensure_remote(&self) -> DebridDavResult<()> {
        if self.config.remote_enabled() {
            Ok(())
        } else {
            Err(DebridDavError::Configuration(
                "remote API is disabled or no token is configured".to_string(),
            ))
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the persisted catalog, restore pending repairs, then start the
    /// refresh loop and the repair workers.
    pub async fn start(self: &Arc<Self>) -> DebridDavResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let restored = self.bootstrap().await?;
        info!(restored = restored, "Catalog restored from store");

        if self.config.repair.enabled {
            self.repair.rehydrate().await?;
            self.repair.start();
        }

        self.shutdown_tx.send_replace(false);
        let handle = self.spawn_refresh_loop();
        *self.refresh_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stop background work. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Refresh loop ended abnormally");
            }
        }
        self.repair.stop().await;
        info!("Filesystem stopped");
    }

    /// Seed the catalog with the metadata saved by the last refresh.
    pub async fn bootstrap(&self) -> DebridDavResult<usize> {
        let items = run_blocking(&self.store, |store| store.load_torrents()).await?;
        let count = items.len();
        for item in items {
            self.catalog.upsert(item);
        }
        Ok(count)
    }

    fn spawn_refresh_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let fs = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            // Refresh right away, then on the interval or on demand.
            let mut wait = false;
            loop {
                if wait {
                    let secs = fs.refresh_interval.load(Ordering::Relaxed);
                    let sleep = async {
                        if secs == 0 {
                            std::future::pending::<()>().await
                        } else {
                            tokio::time::sleep(Duration::from_secs(secs)).await
                        }
                    };
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = fs.refresh_trigger.notified() => {}
                        _ = sleep => {}
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                wait = true;
                if !fs.config.remote_enabled() {
                    continue;
                }
                if let Err(e) = fs.prefetch().await {
                    warn!(error = %e, "Catalog refresh failed");
                }
            }
            debug!("Refresh loop stopped");
        })
    }

    // =========================================================================
    // Refresh control
    // =========================================================================

    /// Replace the catalog with the remote listing and persist it.
    #[instrument(skip(self))]
    pub async fn prefetch(&self) -> DebridDavResult<RefreshStatus> {
        self.ensure_remote()?;
        let _running = self.refresh_lock.lock().await;

        let result = self.fetch_and_replace().await;
        let status = match &result {
            Ok(status) => status.clone(),
            Err(e) => RefreshStatus {
                at: Utc::now(),
                total: self.catalog.len(),
                added: 0,
                removed: 0,
                ignored_empty: false,
                error: Some(e.to_string()),
            },
        };
        *self.last_refresh.write().unwrap_or_else(PoisonError::into_inner) = Some(status);
        result
    }

    async fn fetch_and_replace(&self) -> DebridDavResult<RefreshStatus> {
        let token = self.tokens.primary()?;
        let summaries = self
            .client
            .list_torrents(&token, |fetched, total| {
                debug!(fetched = fetched, total = ?total, "Listing torrents");
            })
            .await?;

        let now = Utc::now();
        let items: Vec<TorrentItem> = summaries.into_iter().map(|s| s.into_item(now)).collect();
        let outcome = self.catalog.replace_all(items);

        for id in &outcome.removed {
            self.caches.invalidate_torrent(id).await;
        }
        if outcome.applied {
            let snapshot = self.catalog.list();
            run_blocking(&self.store, move |store| store.save_torrents(&snapshot)).await?;
        }

        Ok(RefreshStatus {
            at: now,
            total: outcome.total,
            added: outcome.added.len(),
            removed: outcome.removed.len(),
            ignored_empty: outcome.ignored_empty,
            error: None,
        })
    }

    /// Refresh one torrent from its remote detail.
    pub async fn refresh_one(&self, torrent_id: &str) -> DebridDavResult<TorrentItem> {
        self.ensure_remote()?;
        let info = self.resolver.fetch_torrent_info(torrent_id).await?;
        let name = self.catalog.upsert(info.to_item(Utc::now()));
        self.catalog
            .get(&name)
            .ok_or_else(|| DebridDavError::NotFound(torrent_id.to_string()))
    }

    /// Wake the refresh loop now instead of at the next tick.
    pub fn force_refresh(&self) {
        self.refresh_trigger.notify_one();
    }

    /// Change the refresh period. Zero disables periodic refresh.
    pub fn set_refresh_interval(&self, secs: u64) {
        self.refresh_interval.store(secs, Ordering::Relaxed);
        // Re-arm the loop with the new period.
        self.refresh_trigger.notify_one();
        info!(interval_secs = secs, "Refresh interval changed");
    }

    pub fn refresh_info(&self) -> RefreshInfo {
        RefreshInfo {
            interval_secs: self.refresh_interval.load(Ordering::Relaxed),
            last: self
                .last_refresh
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Delete a torrent remotely, then drop every local trace of it.
    /// A remote failure leaves the catalog as it was.
    #[instrument(skip(self), fields(torrent_id = %torrent_id))]
    pub async fn delete_torrent(&self, torrent_id: &str) -> DebridDavResult<()> {
        self.ensure_remote()?;
        let token = self.tokens.primary()?;
        if let Err(e) = self.client.delete_torrent(&token, torrent_id).await {
            error!(torrent_id = %torrent_id, error = %e, "Remote delete failed");
            return Err(match e {
                DebridDavError::ApiError { .. }
                | DebridDavError::TimedOut(_)
                | DebridDavError::NetworkError(_) => e,
                other => DebridDavError::ApiError {
                    status: 502,
                    message: other.to_string(),
                },
            });
        }

        self.catalog.remove_by_id(torrent_id);
        self.caches.invalidate_torrent(torrent_id).await;
        let id = torrent_id.to_string();
        run_blocking(&self.store, move |store| store.delete_torrent(&id)).await?;
        info!(torrent_id = %torrent_id, "Torrent deleted");
        Ok(())
    }
}
