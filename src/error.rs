use axum::http::StatusCode;
use dav_server::fs::FsError;
use serde::Serialize;
use thiserror::Error;

/// One configuration problem found by `Config::validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for debrid-dav.
#[derive(Error, Debug, Clone)]
pub enum DebridDavError {
    /// Torrent, file or path does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credential rejected by the provider
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Operation timed out: {0}")]
    TimedOut(String),

    /// Network error - connection refused, reset, DNS, ...
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider returned an error we don't classify further
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// The token's transfer quota is used up
    #[error("Bandwidth limit reached: {0}")]
    BandwidthLimited(String),

    /// Every configured token is bandwidth-exhausted
    #[error("All tokens exhausted")]
    AllTokensExhausted,

    /// The provider can never serve this content (not cached, infringing, removed)
    #[error("Content unavailable ({reason}): {message}")]
    ContentUnavailable { reason: String, message: String },

    /// The client went away mid-transfer
    #[error("Client disconnected: {0}")]
    ClientDisconnected(String),

    /// Service disabled or credential missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl DebridDavError {
    /// HTTP status returned to WebDAV and management clients for this error.
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            DebridDavError::NotFound(_) | DebridDavError::ContentUnavailable { .. } => {
                StatusCode::NOT_FOUND
            }
            DebridDavError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DebridDavError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            DebridDavError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            DebridDavError::ApiError { status, .. } => match status {
                404 => StatusCode::NOT_FOUND,
                416 => StatusCode::RANGE_NOT_SATISFIABLE,
                429 | 503 => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            DebridDavError::BandwidthLimited(_) | DebridDavError::AllTokensExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DebridDavError::ClientDisconnected(_) => StatusCode::BAD_REQUEST,
            DebridDavError::Configuration(_)
            | DebridDavError::InvalidArgument(_)
            | DebridDavError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DebridDavError::ParseError(_) => StatusCode::BAD_GATEWAY,
            DebridDavError::IoError(_) | DebridDavError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DebridDavError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            DebridDavError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Filesystem error handed to the WebDAV handler, which turns it into
    /// the response status.
    pub fn to_fs_error(&self) -> FsError {
        match self.to_status_code() {
            StatusCode::NOT_FOUND => FsError::NotFound,
            StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => FsError::Forbidden,
            StatusCode::NOT_IMPLEMENTED => FsError::NotImplemented,
            StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => FsError::IsRemote,
            _ => FsError::GeneralFailure,
        }
    }

    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DebridDavError::TimedOut(_)
                | DebridDavError::NetworkError(_)
                | DebridDavError::ApiError {
                    status: 408 | 429 | 500 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Check if this error is the provider's quota signal.
    pub fn is_bandwidth_limit(&self) -> bool {
        matches!(
            self,
            DebridDavError::BandwidthLimited(_) | DebridDavError::AllTokensExhausted
        )
    }

    /// Check if the provider said this content can never be served.
    pub fn is_not_cached(&self) -> bool {
        matches!(
            self,
            DebridDavError::ContentUnavailable { reason, .. }
                if reason.starts_with(crate::types::NOT_CACHED_PREFIX)
        )
    }

    /// Short machine-readable reason recorded on repair entries and quarantines.
    pub fn reason(&self) -> String {
        match self {
            DebridDavError::ContentUnavailable { reason, .. } => reason.clone(),
            DebridDavError::NotFound(_) => "not_found".to_string(),
            DebridDavError::TimedOut(_) => "timeout".to_string(),
            DebridDavError::NetworkError(_) => "network".to_string(),
            DebridDavError::BandwidthLimited(_) => "bandwidth_limited".to_string(),
            DebridDavError::AllTokensExhausted => "all_tokens_exhausted".to_string(),
            DebridDavError::PermissionDenied(_) => "permission_denied".to_string(),
            DebridDavError::ApiError { status, .. } => format!("api_error_{}", status),
            _ => "error".to_string(),
        }
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for DebridDavError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::NotFound => DebridDavError::NotFound(e.to_string()),
    std::io::ErrorKind::PermissionDenied => DebridDavError::PermissionDenied(e.to_string()),
    std::io::ErrorKind::TimedOut => DebridDavError::TimedOut(e.to_string()),
    std::io::ErrorKind::InvalidInput => DebridDavError::InvalidArgument(e.to_string()),
    _ => DebridDavError::IoError(e.to_string()),
});

impl_from_error!(reqwest::Error, e => if e.is_timeout() {
    DebridDavError::TimedOut(e.to_string())
} else if e.is_connect() {
    DebridDavError::NetworkError(format!("Server disconnected: {}", e))
} else if e.is_request() {
    DebridDavError::NetworkError(e.to_string())
} else if e.is_decode() {
    DebridDavError::ParseError(e.to_string())
} else {
    DebridDavError::IoError(format!("HTTP error: {}", e))
});

impl_from_error!(serde_json::Error, e => DebridDavError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => DebridDavError::ParseError(e.to_string()));
impl_from_error!(rusqlite::Error, e => DebridDavError::Database(e.to_string()));

/// Result type alias for operations that can fail with DebridDavError.
pub type DebridDavResult<T> = Result<T, DebridDavError>;
