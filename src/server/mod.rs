//! HTTP surface: the WebDAV tree at `/` and the management API at `/api`.

pub mod management;
pub mod state;

pub use state::AppState;

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    response::Response,
    Router,
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::DebridDavResult;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", management::routes())
        // Everything else is WebDAV, whatever the method.
        .fallback(dav_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dav_fallback(State(state): State<Arc<AppState>>, req: Request) -> Response {
    state.dav().handle(req).await
}

/// Serve until `shutdown` resolves, then let in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> DebridDavResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "WebDAV server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
