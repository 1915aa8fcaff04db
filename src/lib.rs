pub mod api;
pub mod cache;
pub mod config;
pub mod dav;
pub mod error;
pub mod fs;
pub mod metrics;
pub mod mount;
pub mod repair;
pub mod server;
pub mod store;
pub mod types;

pub use cache::{Cache, CacheStats};
pub use config::{CliArgs, Config};
pub use error::{DebridDavError, DebridDavResult};
pub use fs::DebridFs;
pub use metrics::Metrics;
pub use mount::{MountRequest, MountSupervisor, SystemProcessControl};
pub use server::{create_router, AppState};

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

/// URL the mount process uses to reach this server.
pub fn local_dav_url(config: &Config) -> String {
    let host = if config.server.host.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        config.server.host
    };
    format!("http://{}/", SocketAddr::new(host, config.server.port))
}

pub async fn run(config: Config) -> Result<()> {
    tracing::info!(operation = "startup", message = "debrid-dav starting");
    tracing::debug!(
        api_url = %config.api.url,
        tokens = config.api.tokens.len(),
        port = config.server.port,
        "Configuration loaded"
    );
    config.validate().context("Invalid configuration")?;
    if !config.remote_enabled() {
        tracing::warn!("Remote API disabled or no token configured; serving the stored catalog only");
    }

    let metrics = Arc::new(Metrics::new());

    // Opening the database touches the disk; keep it off the runtime threads.
    let fs_config = config.clone();
    let fs_metrics = Arc::clone(&metrics);
    let fs = tokio::task::spawn_blocking(move || DebridFs::from_config(fs_config, fs_metrics))
        .await
        .context("Filesystem setup task failed")?
        .context("Failed to create filesystem")?;
    let fs = Arc::new(fs);
    let mounts = Arc::new(MountSupervisor::new(
        config.mount.clone(),
        local_dav_url(&config),
        Arc::clone(fs.catalog()),
        Arc::new(SystemProcessControl::new()),
    ));
    let state = Arc::new(AppState::new(Arc::clone(&fs), Arc::clone(&mounts)));
    let router = create_router(Arc::clone(&state));

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    fs.start().await.context("Failed to start filesystem")?;

    if config.mount.auto_mount {
        // Waits in the background if the first refresh has not landed yet.
        if let Err(e) = mounts
            .mount(MountRequest::default(), state.mount_credential())
            .await
        {
            tracing::error!(error = %e, "Auto-mount failed");
        }
    }

    let served = server::serve(listener, router, server::shutdown_signal()).await;

    tracing::info!("Shutting down");
    mounts.unmount_all().await;
    fs.shutdown().await;

    // Log final metrics on shutdown
    metrics.log_full_summary();

    served.context("Server error")
}
