use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Counters for the WebDAV front end.
#[derive(Debug, Default)]
pub struct DavMetrics {
    pub propfind_count: AtomicU64,
    pub propfind_memo_hits: AtomicU64,
    pub get_count: AtomicU64,
    pub head_count: AtomicU64,
    pub delete_count: AtomicU64,
    pub options_count: AtomicU64,
    /// MOVE, COPY, LOCK, ...
    pub unsupported_count: AtomicU64,
    /// 304 answers to If-None-Match
    pub not_modified_count: AtomicU64,
    /// Total bytes streamed to clients
    pub bytes_streamed: AtomicU64,
    /// Streams cut by a peer hanging up mid-read
    pub client_disconnects: AtomicU64,
    /// Genuine upstream read failures mid-stream
    pub stream_errors: AtomicU64,
    /// Requests answered with a 4xx/5xx status
    pub error_count: AtomicU64,
}

impl DavMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_propfind(&self) {
        self.propfind_count.fetch_add(1, Ordering::Relaxed);
        trace!(dav_op = "propfind");
    }

    /// A torrent listing came from the memo instead of the remote detail.
    pub fn record_memo_hit(&self) {
        self.propfind_memo_hits.fetch_add(1, Ordering::Relaxed);
        trace!(dav_op = "propfind", memo_hit = true);
    }

    pub fn record_get(&self) {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        trace!(dav_op = "get");
    }

    pub fn record_head(&self) {
        self.head_count.fetch_add(1, Ordering::Relaxed);
        trace!(dav_op = "head");
    }

    pub fn record_delete(&self) {
        self.delete_count.fetch_add(1, Ordering::Relaxed);
        trace!(dav_op = "delete");
    }

    pub fn record_options(&self) {
        self.options_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsupported(&self, method: &str) {
        self.unsupported_count.fetch_add(1, Ordering::Relaxed);
        debug!(dav_op = "unsupported", method = method);
    }

    pub fn record_not_modified(&self) {
        self.not_modified_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_streamed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_client_disconnect(&self) {
        self.client_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// MiB streamed per second of uptime.
    pub fn throughput_mbps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        let bytes = self.bytes_streamed.load(Ordering::Relaxed);
        (bytes as f64 / 1_048_576.0) / elapsed_secs
    }

    pub fn log_summary(&self, elapsed_secs: f64) {
        info!(
            operation = "dav_metrics_summary",
            propfind = self.propfind_count.load(Ordering::Relaxed),
            propfind_memo_hits = self.propfind_memo_hits.load(Ordering::Relaxed),
            get = self.get_count.load(Ordering::Relaxed),
            head = self.head_count.load(Ordering::Relaxed),
            delete = self.delete_count.load(Ordering::Relaxed),
            bytes_streamed = self.bytes_streamed.load(Ordering::Relaxed),
            throughput_mbps = self.throughput_mbps(elapsed_secs),
            client_disconnects = self.client_disconnects.load(Ordering::Relaxed),
            stream_errors = self.stream_errors.load(Ordering::Relaxed),
            errors = self.error_count.load(Ordering::Relaxed),
            duration_secs = elapsed_secs,
        );
    }
}

/// Counters for calls to the provider's REST API.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    pub request_count: AtomicU64,
    pub success_count: AtomicU64,
    /// Calls that failed after their last attempt
    pub failure_count: AtomicU64,
    pub retry_count: AtomicU64,
    /// Summed over successful calls, in nanoseconds
    pub total_latency_ns: AtomicU64,
    /// Bandwidth-limit signals seen from the provider
    pub bandwidth_limits: AtomicU64,
    pub token_rotations: AtomicU64,
    /// Links resolved through the fallback endpoint
    pub fallback_resolutions: AtomicU64,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, endpoint: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        trace!(api_op = "request", endpoint = endpoint);
    }

    pub fn record_success(&self, endpoint: &str, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            api_op = "success",
            endpoint = endpoint,
            latency_ms = latency.as_millis() as u64
        );
    }

    pub fn record_failure(&self, endpoint: &str, error: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        trace!(api_op = "failure", endpoint = endpoint, error = error);
    }

    pub fn record_retry(&self, endpoint: &str, attempt: u32) {
        self.retry_count.fetch_add(1, Ordering::Relaxed);
        debug!(api_op = "retry", endpoint = endpoint, attempt = attempt);
    }

    pub fn record_bandwidth_limit(&self) {
        self.bandwidth_limits.fetch_add(1, Ordering::Relaxed);
        warn!(api_op = "bandwidth_limit");
    }

    pub fn record_token_rotation(&self) {
        self.token_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallback_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean latency of successful calls.
    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.success_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total_ns = self.total_latency_ns.load(Ordering::Relaxed);
        (total_ns as f64 / count as f64) / 1_000_000.0
    }

    /// Percentage of calls that succeeded; 100 before any call.
    pub fn success_rate(&self) -> f64 {
        let total = self.request_count.load(Ordering::Relaxed);
        if total == 0 {
            return 100.0;
        }
        let success = self.success_count.load(Ordering::Relaxed);
        (success as f64 / total as f64) * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            operation = "api_metrics_summary",
            total_requests = self.request_count.load(Ordering::Relaxed),
            successful = self.success_count.load(Ordering::Relaxed),
            failed = self.failure_count.load(Ordering::Relaxed),
            retries = self.retry_count.load(Ordering::Relaxed),
            bandwidth_limits = self.bandwidth_limits.load(Ordering::Relaxed),
            token_rotations = self.token_rotations.load(Ordering::Relaxed),
            success_rate_pct = self.success_rate(),
            avg_latency_ms = self.avg_latency_ms(),
        );
    }
}

/// Point-in-time copy of every counter, served by `/api/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub dav: DavSnapshot,
    pub api: ApiSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DavSnapshot {
    pub propfind: u64,
    pub propfind_memo_hits: u64,
    pub get: u64,
    pub head: u64,
    pub delete: u64,
    pub options: u64,
    pub unsupported: u64,
    pub not_modified: u64,
    pub bytes_streamed: u64,
    pub client_disconnects: u64,
    pub stream_errors: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub bandwidth_limits: u64,
    pub token_rotations: u64,
    pub fallback_resolutions: u64,
    pub avg_latency_ms: f64,
}

/// Every counter group, shared by the filesystem and the HTTP surface.
pub struct Metrics {
    pub dav: Arc<DavMetrics>,
    pub api: Arc<ApiMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            dav: Arc::new(DavMetrics::new()),
            api: Arc::new(ApiMetrics::new()),
            start_time: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let d = &self.dav;
        let a = &self.api;
        MetricsSnapshot {
            uptime_secs: self.elapsed().as_secs(),
            dav: DavSnapshot {
                propfind: d.propfind_count.load(Ordering::Relaxed),
                propfind_memo_hits: d.propfind_memo_hits.load(Ordering::Relaxed),
                get: d.get_count.load(Ordering::Relaxed),
                head: d.head_count.load(Ordering::Relaxed),
                delete: d.delete_count.load(Ordering::Relaxed),
                options: d.options_count.load(Ordering::Relaxed),
                unsupported: d.unsupported_count.load(Ordering::Relaxed),
                not_modified: d.not_modified_count.load(Ordering::Relaxed),
                bytes_streamed: d.bytes_streamed.load(Ordering::Relaxed),
                client_disconnects: d.client_disconnects.load(Ordering::Relaxed),
                stream_errors: d.stream_errors.load(Ordering::Relaxed),
                errors: d.error_count.load(Ordering::Relaxed),
            },
            api: ApiSnapshot {
                requests: a.request_count.load(Ordering::Relaxed),
                successes: a.success_count.load(Ordering::Relaxed),
                failures: a.failure_count.load(Ordering::Relaxed),
                retries: a.retry_count.load(Ordering::Relaxed),
                bandwidth_limits: a.bandwidth_limits.load(Ordering::Relaxed),
                token_rotations: a.token_rotations.load(Ordering::Relaxed),
                fallback_resolutions: a.fallback_resolutions.load(Ordering::Relaxed),
                avg_latency_ms: a.avg_latency_ms(),
            },
        }
    }

    /// Logged once on shutdown.
    pub fn log_full_summary(&self) {
        let uptime = self.elapsed().as_secs_f64();
        info!("=== debrid-dav Metrics Summary ===");
        self.dav.log_summary(uptime);
        self.api.log_summary();
        info!("==================================");
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
