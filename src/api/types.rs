//! Wire schemas for the provider's REST API.
//!
//! Every endpoint gets its own struct. Responses that do not match are a
//! decode error, never a silently defaulted value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DebridDavError;
use crate::types::{TorrentFile, TorrentInfo, TorrentItem, NOT_CACHED_PREFIX};

/// Provider error codes we react to.
pub mod codes {
    pub const UNKNOWN_RESOURCE: i64 = 7;
    pub const BAD_TOKEN: i64 = 8;
    pub const TRAFFIC_EXHAUSTED: i64 = 23;
    pub const UNAVAILABLE_FILE: i64 = 24;
    pub const INFRINGING_FILE: i64 = 35;
    pub const FAIR_USAGE_LIMIT: i64 = 36;
}

/// One entry of `GET /torrents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentSummary {
    pub id: String,
    pub filename: String,
    pub hash: String,
    pub bytes: u64,
    pub status: String,
    pub progress: f64,
    pub added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    pub links: Vec<String>,
}

impl TorrentSummary {
    /// Catalog entry for a listed torrent. The file count is unknown until
    /// the detail is fetched.
    pub fn into_item(self, seen_at: DateTime<Utc>) -> TorrentItem {
        TorrentItem {
            id: self.id,
            name: String::new(),
            filename: self.filename,
            hash: self.hash,
            bytes: self.bytes,
            status: self.status,
            progress: self.progress,
            added: self.added,
            ended: self.ended,
            links: self.links,
            selected_files: None,
            seen_at,
        }
    }
}

/// One file of `GET /torrents/info/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFileResponse {
    pub id: u64,
    pub path: String,
    pub bytes: u64,
    /// 1 if the file was selected for download
    pub selected: u8,
}

/// Response of `GET /torrents/info/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentInfoResponse {
    pub id: String,
    pub filename: String,
    pub hash: String,
    pub bytes: u64,
    pub status: String,
    pub progress: f64,
    pub added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    pub files: Vec<TorrentFileResponse>,
    pub links: Vec<String>,
}

impl From<TorrentInfoResponse> for TorrentInfo {
    /// Links are listed in the same order as the selected files.
    fn from(resp: TorrentInfoResponse) -> Self {
        let mut links = resp.links.iter();
        let files = resp
            .files
            .into_iter()
            .map(|f| {
                let selected = f.selected == 1;
                let mut file = TorrentFile::new(f.id, f.path, f.bytes, selected);
                if selected {
                    file.link = links.next().cloned();
                }
                file
            })
            .collect();

        TorrentInfo {
            id: resp.id,
            filename: resp.filename,
            hash: resp.hash,
            bytes: resp.bytes,
            status: resp.status,
            progress: resp.progress,
            added: resp.added,
            ended: resp.ended,
            files,
            links: resp.links,
        }
    }
}

/// Response of `POST /unrestrict/link`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrestrictResponse {
    pub id: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub filesize: u64,
    pub link: String,
    pub download: String,
}

/// Response of `GET /user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub points: i64,
    #[serde(rename = "type")]
    pub account_type: String,
    /// Remaining premium seconds
    pub premium: i64,
    pub expiration: Option<DateTime<Utc>>,
}

/// Per-host entry of `GET /traffic`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTraffic {
    pub left: Option<i64>,
    pub bytes: Option<i64>,
    pub links: Option<i64>,
    pub limit: Option<i64>,
    #[serde(rename = "type")]
    pub traffic_type: Option<String>,
    pub reset: Option<String>,
}

pub type TrafficInfo = HashMap<String, HostTraffic>;

/// Error body the provider sends with non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderErrorBody {
    pub error: String,
    pub error_code: Option<i64>,
}

/// Map a failed provider response onto the error taxonomy.
pub fn classify_provider_error(status: u16, body: &str) -> DebridDavError {
    let parsed: Option<ProviderErrorBody> = serde_json::from_str(body).ok();
    let message = match &parsed {
        Some(b) => b.error.clone(),
        None if body.is_empty() => format!("HTTP {}", status),
        None => body.to_string(),
    };
    let code = parsed.and_then(|b| b.error_code);

    match (code, status) {
        (Some(codes::TRAFFIC_EXHAUSTED | codes::FAIR_USAGE_LIMIT), _) | (_, 509) => {
            DebridDavError::BandwidthLimited(message)
        }
        (Some(codes::UNAVAILABLE_FILE), _) => DebridDavError::ContentUnavailable {
            reason: NOT_CACHED_PREFIX.to_string(),
            message,
        },
        (Some(codes::INFRINGING_FILE), _) => DebridDavError::ContentUnavailable {
            reason: format!("{}_infringing", NOT_CACHED_PREFIX),
            message,
        },
        (Some(codes::UNKNOWN_RESOURCE), _) | (_, 404) => DebridDavError::NotFound(message),
        (Some(codes::BAD_TOKEN), _) | (_, 401) => DebridDavError::PermissionDenied(message),
        _ => DebridDavError::ApiError { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_response_maps_links_onto_selected_files() {
        let json = serde_json::json!({
            "id": "abc",
            "filename": "Pack",
            "hash": "h",
            "bytes": 30,
            "status": "downloaded",
            "progress": 100,
            "added": "2024-01-02T03:04:05.000Z",
            "ended": "2024-01-02T04:00:00.000Z",
            "files": [
                {"id": 1, "path": "/a.mkv", "bytes": 10, "selected": 1},
                {"id": 2, "path": "/b.nfo", "bytes": 10, "selected": 0},
                {"id": 3, "path": "/c.mkv", "bytes": 10, "selected": 1}
            ],
            "links": ["https://rd/l1", "https://rd/l3"]
        });
        let resp: TorrentInfoResponse = serde_json::from_value(json).unwrap();
        let info = TorrentInfo::from(resp);

        assert!(info.is_complete());
        assert_eq!(info.files[0].link.as_deref(), Some("https://rd/l1"));
        assert_eq!(info.files[1].link, None);
        assert_eq!(info.files[2].link.as_deref(), Some("https://rd/l3"));
    }

    #[test]
    fn test_missing_field_fails_closed() {
        let json = serde_json::json!({"id": "abc", "filename": "x"});
        assert!(serde_json::from_value::<TorrentSummary>(json).is_err());
    }

    #[test]
    fn test_classify_provider_errors() {
        let body = |code: i64| format!(r#"{{"error":"e","error_code":{}}}"#, code);

        assert!(classify_provider_error(503, &body(23)).is_bandwidth_limit());
        assert!(classify_provider_error(503, &body(36)).is_bandwidth_limit());
        assert!(classify_provider_error(509, "").is_bandwidth_limit());
        assert_eq!(classify_provider_error(503, &body(24)).reason(), "not_cached");
        assert_eq!(
            classify_provider_error(451, &body(35)).reason(),
            "not_cached_infringing"
        );
        assert!(matches!(
            classify_provider_error(404, "gone"),
            DebridDavError::NotFound(_)
        ));
        assert!(matches!(
            classify_provider_error(401, &body(8)),
            DebridDavError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_provider_error(500, "<html>"),
            DebridDavError::ApiError { status: 500, .. }
        ));
    }
}
