//! Direct file access through the provider's own WebDAV-style file endpoint.
//!
//! Only used once the unrestrict API has nothing left to offer.

use base64::Engine;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::FallbackConfig;
use crate::error::{DebridDavError, DebridDavResult};
use crate::types::DownloadLink;

/// Token recorded on links produced by the fallback endpoint.
pub const FALLBACK_TOKEN: &str = "fallback";

pub struct FallbackClient {
    client: Client,
    base_url: String,
    auth_credentials: (String, String),
}

impl FallbackClient {
    /// Build a client if the fallback endpoint and its credential are configured.
    pub fn from_config(config: &FallbackConfig, timeout: Duration) -> DebridDavResult<Option<Self>> {
        let (Some(url), Some(username), Some(password)) =
            (&config.url, &config.username, &config.password)
        else {
            return Ok(None);
        };

        let _ = reqwest::Url::parse(url)
            .map_err(|e| DebridDavError::Configuration(format!("Invalid fallback URL: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DebridDavError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Some(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            auth_credentials: (username.clone(), password.clone()),
        }))
    }

    /// Create Authorization header for HTTP Basic Auth
    fn create_auth_header(&self) -> String {
        let (username, password) = &self.auth_credentials;
        let credentials = format!("{}:{}", username, password);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    }

    /// URL of `file_path` inside the torrent folder named `torrent_filename`.
    pub fn file_url(&self, torrent_filename: &str, file_path: &str) -> String {
        let mut url = format!(
            "{}/torrents/{}",
            self.base_url,
            urlencoding::encode(torrent_filename)
        );
        for segment in file_path.split('/').filter(|s| !s.is_empty()) {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }

    /// Check the file exists on the fallback endpoint and return a link to it.
    #[instrument(skip(self), fields(api_op = "fallback_resolve"))]
    pub async fn resolve(
        &self,
        torrent_id: &str,
        torrent_filename: &str,
        file_name: &str,
        file_path: &str,
    ) -> DebridDavResult<DownloadLink> {
        let url = self.file_url(torrent_filename, file_path);
        let auth = self.create_auth_header();

        let response = self
            .client
            .head(&url)
            .header(reqwest::header::AUTHORIZATION, &auth)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                let filesize = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                let mime_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                debug!(torrent_id = torrent_id, file = file_name, "Resolved through fallback");
                Ok(DownloadLink {
                    torrent_id: torrent_id.to_string(),
                    file_name: file_name.to_string(),
                    url,
                    token: FALLBACK_TOKEN.to_string(),
                    auth_header: Some(auth),
                    filesize,
                    mime_type,
                    resolved_at: Utc::now(),
                })
            }
            StatusCode::NOT_FOUND => Err(DebridDavError::NotFound(format!(
                "{}/{} on fallback endpoint",
                torrent_filename, file_path
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(
                DebridDavError::PermissionDenied("fallback credential rejected".to_string()),
            ),
            s => Err(DebridDavError::ApiError {
                status: s.as_u16(),
                message: "fallback endpoint error".to_string(),
            }),
        }
    }
}
