//! Mount supervisor: one small state machine per mount path around an
//! external `rclone mount` process.
//!
//! ```text
//! unmounted -> mounting -> mounted | waiting | error
//! waiting   -> mounting            (once the catalog has torrents)
//! mounted   -> unmounting -> unmounted
//! ```

pub mod process;

pub use process::{ProcessControl, ProcessSpec, SystemProcessControl};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, error, info, warn};

use crate::config::MountConfig;
use crate::error::{DebridDavError, DebridDavResult};
use crate::fs::catalog::TorrentCatalog;

/// Time a mount process gets to exit before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Environment variable rclone reads the WebDAV bearer token from.
const CREDENTIAL_ENV: &str = "RCLONE_WEBDAV_BEARER_TOKEN";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    /// Paused until the catalog is populated; poll status
    Waiting,
    Unmounting,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountStatus {
    pub path: PathBuf,
    pub state: MountState,
    pub pid: Option<u32>,
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl MountStatus {
    fn new(path: PathBuf, state: MountState) -> Self {
        Self {
            path,
            state,
            pid: None,
            message: None,
            since: Utc::now(),
        }
    }
}

/// Overrides for one mount; unset fields come from `[mount]` config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MountRequest {
    pub path: Option<PathBuf>,
    pub cache_mode: Option<String>,
    pub buffer_size: Option<String>,
    pub poll_interval: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved mount options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    pub path: PathBuf,
    pub cache_mode: String,
    pub buffer_size: String,
    pub poll_interval: String,
    pub log_level: String,
}

impl MountOptions {
    pub fn resolve(request: MountRequest, config: &MountConfig) -> Self {
        Self {
            path: request.path.unwrap_or_else(|| config.mount_point.clone()),
            cache_mode: request.cache_mode.unwrap_or_else(|| config.cache_mode.clone()),
            buffer_size: request.buffer_size.unwrap_or_else(|| config.buffer_size.clone()),
            poll_interval: request
                .poll_interval
                .unwrap_or_else(|| config.poll_interval.clone()),
            log_level: request.log_level.unwrap_or_else(|| config.log_level.clone()),
        }
    }
}

pub struct MountSupervisor {
    config: MountConfig,
    dav_url: String,
    catalog: Arc<TorrentCatalog>,
    process: Arc<dyn ProcessControl>,
    mounts: DashMap<PathBuf, MountStatus>,
    wait_poll: Duration,
}

impl MountSupervisor {
    pub fn new(
        config: MountConfig,
        dav_url: impl Into<String>,
        catalog: Arc<TorrentCatalog>,
        process: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            wait_poll: Duration::from_secs(config.wait_poll_secs.max(1)),
            config,
            dav_url: dav_url.into(),
            catalog,
            process,
            mounts: DashMap::new(),
        }
    }

    pub fn with_wait_poll(mut self, every: Duration) -> Self {
        self.wait_poll = every;
        self
    }

    /// rclone invocation for `options`. The credential travels in the
    /// environment so it never shows up in a process listing.
    pub fn command(&self, options: &MountOptions, credential: Option<&str>) -> ProcessSpec {
        let args = vec![
            "mount".to_string(),
            ":webdav:".to_string(),
            options.path.to_string_lossy().into_owned(),
            "--webdav-url".to_string(),
            self.dav_url.clone(),
            "--vfs-cache-mode".to_string(),
            options.cache_mode.clone(),
            "--buffer-size".to_string(),
            options.buffer_size.clone(),
            "--poll-interval".to_string(),
            options.poll_interval.clone(),
            "--dir-cache-time".to_string(),
            options.poll_interval.clone(),
            "--log-level".to_string(),
            options.log_level.clone(),
        ];
        let env = credential
            .map(|c| vec![(CREDENTIAL_ENV.to_string(), c.to_string())])
            .unwrap_or_default();
        ProcessSpec {
            program: self.config.rclone_path.clone(),
            args,
            env,
        }
    }

    fn set(&self, status: MountStatus) -> MountStatus {
        self.mounts.insert(status.path.clone(), status.clone());
        status
    }

    /// Mount, or report the current state if already mounted or pending.
    /// With an empty catalog the mount waits in the background.
    pub async fn mount(
        self: &Arc<Self>,
        request: MountRequest,
        credential: Option<String>,
    ) -> DebridDavResult<MountStatus> {
        let options = MountOptions::resolve(request, &self.config);
        if !options.path.is_absolute() {
            return Err(DebridDavError::InvalidArgument(format!(
                "mount point must be absolute: {}",
                options.path.display()
            )));
        }

        let current = self.status(Some(&options.path));
        if matches!(
            current.state,
            MountState::Mounted | MountState::Mounting | MountState::Waiting | MountState::Unmounting
        ) {
            debug!(path = %options.path.display(), state = %current.state, "Mount already in progress");
            return Ok(current);
        }

        if self.catalog.is_empty() {
            info!(path = %options.path.display(), "Catalog empty; mount waiting");
            let mut status = MountStatus::new(options.path.clone(), MountState::Waiting);
            status.message = Some("waiting for the torrent catalog".to_string());
            let status = self.set(status);
            self.spawn_waiter(options, credential);
            return Ok(status);
        }

        Ok(self.start_mount(&options, credential.as_deref()).await)
    }

    fn spawn_waiter(self: &Arc<Self>, options: MountOptions, credential: Option<String>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(supervisor.wait_poll).await;
                let still_waiting = supervisor
                    .mounts
                    .get(&options.path)
                    .is_some_and(|s| s.state == MountState::Waiting);
                if !still_waiting {
                    debug!(path = %options.path.display(), "Mount wait cancelled");
                    return;
                }
                if !supervisor.catalog.is_empty() {
                    supervisor.start_mount(&options, credential.as_deref()).await;
                    return;
                }
            }
        });
    }

    async fn start_mount(&self, options: &MountOptions, credential: Option<&str>) -> MountStatus {
        let path = options.path.clone();
        self.set(MountStatus::new(path.clone(), MountState::Mounting));

        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            return self.fail(path, format!("cannot create mount point: {}", e));
        }

        let spec = self.command(options, credential);
        match self.process.start(&spec) {
            Ok(pid) => {
                info!(path = %path.display(), pid = pid, "Mounted");
                let mut status = MountStatus::new(path, MountState::Mounted);
                status.pid = Some(pid);
                self.set(status)
            }
            Err(e) => self.fail(path, e.to_string()),
        }
    }

    fn fail(&self, path: PathBuf, message: String) -> MountStatus {
        error!(path = %path.display(), error = %message, "Mount failed");
        let mut status = MountStatus::new(path, MountState::Error);
        status.message = Some(message);
        self.set(status)
    }

    /// Unmount `path` (default mount point). Unmounting something that is not
    /// mounted succeeds.
    pub async fn unmount(&self, path: Option<PathBuf>) -> DebridDavResult<MountStatus> {
        let path = path.unwrap_or_else(|| self.config.mount_point.clone());
        let current = self.mounts.get(&path).map(|s| s.value().clone());
        let Some(current) = current else {
            return Ok(MountStatus::new(path, MountState::Unmounted));
        };
        if current.state == MountState::Unmounted {
            return Ok(current);
        }

        let mut unmounting = MountStatus::new(path.clone(), MountState::Unmounting);
        unmounting.pid = current.pid;
        self.set(unmounting);

        if let Some(pid) = current.pid {
            let process = Arc::clone(&self.process);
            let stopped = tokio::task::spawn_blocking(move || process.stop(pid, STOP_GRACE))
                .await
                .map_err(|e| DebridDavError::IoError(e.to_string()))?;
            if let Err(e) = stopped {
                warn!(path = %path.display(), pid = pid, error = %e, "Stopping mount process failed");
            }
        }
        if current.state == MountState::Mounted || current.state == MountState::Error {
            let process = Arc::clone(&self.process);
            let target = path.clone();
            let released = tokio::task::spawn_blocking(move || process.unmount_path(&target))
                .await
                .map_err(|e| DebridDavError::IoError(e.to_string()))?;
            if let Err(e) = released {
                debug!(path = %path.display(), error = %e, "Mount point release skipped");
            }
        }

        info!(path = %path.display(), "Unmounted");
        Ok(self.set(MountStatus::new(path, MountState::Unmounted)))
    }

    /// Current state of `path` (default mount point). A mounted path whose
    /// process died reports an error.
    pub fn status(&self, path: Option<&Path>) -> MountStatus {
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| self.config.mount_point.clone());
        let Some(mut status) = self.mounts.get(&path).map(|s| s.value().clone()) else {
            return MountStatus::new(path, MountState::Unmounted);
        };
        if status.state == MountState::Mounted {
            if let Some(pid) = status.pid {
                if !self.process.is_running(pid) {
                    warn!(path = %path.display(), pid = pid, "Mount process exited");
                    status = MountStatus::new(path, MountState::Error);
                    status.pid = Some(pid);
                    status.message = Some("mount process exited".to_string());
                    return self.set(status);
                }
            }
        }
        status
    }

    pub fn list(&self) -> Vec<MountStatus> {
        let mut all: Vec<MountStatus> = self.mounts.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    /// Unmount everything this supervisor started.
    pub async fn unmount_all(&self) {
        let paths: Vec<PathBuf> = self
            .mounts
            .iter()
            .filter(|s| s.state != MountState::Unmounted)
            .map(|s| s.key().clone())
            .collect();
        for path in paths {
            if let Err(e) = self.unmount(Some(path.clone())).await {
                warn!(path = %path.display(), error = %e, "Unmount during shutdown failed");
            }
        }
    }
}
