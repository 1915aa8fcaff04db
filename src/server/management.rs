//! Operator endpoints under `/api`: health, stats, tokens, account, repair,
//! refresh control and mounts.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{TokenStatus, TrafficInfo, UserInfo};
use crate::cache::CacheTierStats;
use crate::error::DebridDavError;
use crate::fs::{RefreshInfo, RefreshStatus};
use crate::metrics::MetricsSnapshot;
use crate::mount::{MountRequest, MountStatus};
use crate::repair::{RepairStatusReport, ScanReport};
use crate::store::RepairFilter;
use crate::types::{RepairEntry, RepairStatus};

use super::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        // Credentials
        .route("/tokens", get(tokens))
        .route("/tokens/reset", post(reset_tokens))
        .route("/account", get(account))
        // Repair
        .route("/repair/status", get(repair_status))
        .route("/repair/queue", get(repair_queue))
        .route("/repair/entries", get(repair_entries))
        .route("/repair/start", post(repair_start))
        .route("/repair/stop", post(repair_stop))
        .route("/repair/scan", post(repair_scan))
        .route("/repair/force", post(repair_force))
        .route("/repair/all", post(repair_all))
        // Catalog refresh
        .route("/refresh", get(refresh_info).post(refresh_now))
        .route("/refresh/interval", put(set_refresh_interval))
        // Mounts
        .route("/mount", post(mount))
        .route("/unmount", post(unmount))
        .route("/mount/status", get(mount_status))
}

// ============================================================================
// Errors
// ============================================================================

/// JSON error body; the status comes from the error's class.
pub struct ManagementError(DebridDavError);

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
}

impl From<DebridDavError> for ManagementError {
    fn from(err: DebridDavError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ManagementError {
    fn into_response(self) -> Response {
        let status = self.0.to_status_code();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "Management request failed");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            reason: self.0.reason(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ManagementError>;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub remote_enabled: bool,
    pub torrents: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub metrics: MetricsSnapshot,
    pub caches: CacheTierStats,
    pub torrents: usize,
}

#[derive(Debug, Serialize)]
pub struct TokensResponse {
    pub tokens: Vec<TokenStatus>,
    pub all_exhausted: bool,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user: UserInfo,
    pub traffic: TrafficInfo,
}

#[derive(Debug, Serialize)]
pub struct QueueResponse {
    pub pending: Vec<String>,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
pub struct EntriesParams {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<RepairEntry>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ForceRepairRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepairAllRequest {
    #[serde(default)]
    pub include_not_cached: bool,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub queued: usize,
}

#[derive(Debug, Deserialize)]
pub struct IntervalRequest {
    pub seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnmountRequest {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct MountStatusParams {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let fs = state.fs();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        remote_enabled: fs.config().remote_enabled(),
        torrents: fs.catalog().len(),
    })
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let fs = state.fs();
    Json(StatsResponse {
        metrics: fs.metrics().snapshot(),
        caches: fs.caches().stats(),
        torrents: fs.catalog().len(),
    })
}

/// GET /api/tokens
///
/// Tokens are masked; only their rotation state is visible.
pub async fn tokens(State(state): State<Arc<AppState>>) -> Json<TokensResponse> {
    let tokens = state.fs().tokens();
    Json(TokensResponse {
        tokens: tokens.status(),
        all_exhausted: tokens.all_exhausted(),
    })
}

/// POST /api/tokens/reset
pub async fn reset_tokens(State(state): State<Arc<AppState>>) -> Json<TokensResponse> {
    state.fs().tokens().reset_all();
    info!("Token exhaustion cleared by operator");
    tokens(State(state)).await
}

/// GET /api/account
///
/// User and traffic for the primary token.
pub async fn account(State(state): State<Arc<AppState>>) -> ApiResult<AccountResponse> {
    let fs = state.fs();
    fs.ensure_remote()?;
    let token = fs.tokens().primary()?;
    let client = fs.client();
    let (user, traffic) = tokio::join!(client.get_user(&token), client.get_traffic(&token));
    Ok(Json(AccountResponse {
        user: user?,
        traffic: traffic?,
    }))
}

/// GET /api/repair/status
pub async fn repair_status(State(state): State<Arc<AppState>>) -> ApiResult<RepairStatusReport> {
    Ok(Json(state.fs().repair().status().await?))
}

/// GET /api/repair/queue
pub async fn repair_queue(State(state): State<Arc<AppState>>) -> Json<QueueResponse> {
    let queue = state.fs().repair().queue();
    Json(QueueResponse {
        pending: queue.pending(),
        len: queue.len(),
        capacity: queue.capacity(),
    })
}

/// GET /api/repair/entries?status=...&limit=...
pub async fn repair_entries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EntriesParams>,
) -> ApiResult<EntriesResponse> {
    let mut filter = RepairFilter::new().with_limit(params.limit.unwrap_or(0));
    if let Some(status) = params.status.as_deref() {
        let status = RepairStatus::from_str(status).map_err(|_| {
            DebridDavError::InvalidArgument(format!("unknown repair status: {}", status))
        })?;
        filter = filter.with_status(status);
    }
    let entries = state.fs().repair().entries(filter).await?;
    Ok(Json(EntriesResponse {
        count: entries.len(),
        entries,
    }))
}

/// POST /api/repair/start
pub async fn repair_start(State(state): State<Arc<AppState>>) -> ApiResult<RepairStatusReport> {
    let repair = state.fs().repair();
    repair.start();
    Ok(Json(repair.status().await?))
}

/// POST /api/repair/stop
pub async fn repair_stop(State(state): State<Arc<AppState>>) -> ApiResult<RepairStatusReport> {
    let repair = state.fs().repair();
    repair.stop().await;
    Ok(Json(repair.status().await?))
}

/// POST /api/repair/scan
pub async fn repair_scan(State(state): State<Arc<AppState>>) -> ApiResult<ScanReport> {
    Ok(Json(state.fs().repair().scan().await?))
}

/// POST /api/repair/force
pub async fn repair_force(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ForceRepairRequest>,
) -> ApiResult<QueuedResponse> {
    if request.ids.is_empty() {
        return Err(DebridDavError::InvalidArgument("ids must not be empty".to_string()).into());
    }
    let queued = state.fs().repair().force_repair(&request.ids).await?;
    Ok(Json(QueuedResponse { queued }))
}

/// POST /api/repair/all
pub async fn repair_all(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RepairAllRequest>,
) -> ApiResult<QueuedResponse> {
    let queued = state.fs().repair().repair_all(request.include_not_cached).await?;
    Ok(Json(QueuedResponse { queued }))
}

/// GET /api/refresh
pub async fn refresh_info(State(state): State<Arc<AppState>>) -> Json<RefreshInfo> {
    Json(state.fs().refresh_info())
}

/// POST /api/refresh
///
/// Refreshes the catalog now and returns the outcome.
pub async fn refresh_now(
    State(state): State<Arc<AppState>>,
) -> ApiResult<RefreshStatus> {
    Ok(Json(state.fs().prefetch().await?))
}

/// PUT /api/refresh/interval
///
/// Zero disables the periodic refresh.
pub async fn set_refresh_interval(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IntervalRequest>,
) -> Json<RefreshInfo> {
    let fs = state.fs();
    fs.set_refresh_interval(request.seconds);
    Json(fs.refresh_info())
}

/// POST /api/mount
pub async fn mount(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MountRequest>,
) -> Result<(StatusCode, Json<MountStatus>), ManagementError> {
    let credential = state.mount_credential();
    let status = state.mounts().mount(request, credential).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// POST /api/unmount
pub async fn unmount(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnmountRequest>,
) -> ApiResult<MountStatus> {
    Ok(Json(state.mounts().unmount(request.path).await?))
}

/// GET /api/mount/status?path=...
pub async fn mount_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MountStatusParams>,
) -> Json<MountStatus> {
    Json(state.mounts().status(params.path.as_deref()))
}
