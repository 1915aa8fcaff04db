use crate::api::retry::RetryPolicy;
use crate::api::types::*;
use crate::config::Config;
use crate::error::{DebridDavError, DebridDavResult};
use crate::metrics::ApiMetrics;
use crate::types::TorrentInfo;
use reqwest::{Client, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace};

/// HTTP client for the provider's REST API.
pub struct DebridClient {
    client: Client,
    /// No total timeout: bodies of large files stream for as long as they need
    stream_client: Client,
    base_url: String,
    retry: RetryPolicy,
    page_size: usize,
    header_timeout: Duration,
    metrics: Option<Arc<ApiMetrics>>,
}

/// Outcome of a request attempt that may be retried.
enum Attempt {
    Failed(DebridDavError),
    /// The provider answered with a retryable status.
    Refused {
        response: reqwest::Response,
        retry_after: Option<Duration>,
    },
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::Failed(e) => write!(f, "{}", e),
            Attempt::Refused { response, .. } => write!(f, "provider answered {}", response.status()),
        }
    }
}

impl DebridClient {
    /// Create a new DebridClient with default configuration
    pub fn new(base_url: impl Into<String>) -> DebridDavResult<Self> {
        Self::with_config(
            base_url,
            RetryPolicy::default(),
            Duration::from_secs(30),
            2500,
            None,
        )
    }

    pub fn from_config(config: &Config, metrics: Option<Arc<ApiMetrics>>) -> DebridDavResult<Self> {
        let retry = RetryPolicy::new(
            config.api.max_retries + 1,
            Duration::from_millis(config.api.retry_delay_ms),
        );
        let mut client = Self::with_config(
            config.api.url.clone(),
            retry,
            Duration::from_secs(config.api.timeout_secs),
            config.api.page_size,
            metrics,
        )?;
        client.header_timeout = Duration::from_secs(config.stream.header_timeout_secs);
        Ok(client)
    }

    pub fn with_config(
        base_url: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
        page_size: usize,
        metrics: Option<Arc<ApiMetrics>>,
    ) -> DebridDavResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        // Fail fast on an invalid URL
        let _ = reqwest::Url::parse(&base_url)
            .map_err(|e| DebridDavError::Configuration(format!("Invalid API URL: {}", e)))?;

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DebridDavError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        let stream_client = Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| DebridDavError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            base_url,
            retry,
            page_size: page_size.max(1),
            header_timeout: timeout,
            metrics,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request, retrying transient failures under the retry policy.
    /// A 429 waits for `Retry-After` when the provider sends one. Once the
    /// attempts run out, the last response is returned for classification.
    async fn execute_with_retry<F, Fut>(
        &self,
        endpoint: &str,
        operation: F,
    ) -> DebridDavResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let operation = &operation;
        let result = self
            .retry
            .run_with(
                endpoint,
                move |attempt| async move { self.attempt(endpoint, attempt, operation()).await },
                |failed: &Attempt, delay| match failed {
                    Attempt::Failed(e) => e.is_transient().then_some(delay),
                    Attempt::Refused { retry_after, .. } => Some(retry_after.unwrap_or(delay)),
                },
            )
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(Attempt::Refused { response, .. }) => Ok(response),
            Err(Attempt::Failed(e)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(endpoint, &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// One try of a request. Statuses worth retrying come back as errors.
    async fn attempt(
        &self,
        endpoint: &str,
        attempt: u32,
        request: impl std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    ) -> Result<reqwest::Response, Attempt> {
        if let Some(metrics) = &self.metrics {
            metrics.record_request(endpoint);
            if attempt > 0 {
                metrics.record_retry(endpoint, attempt);
            }
        }
        let started = Instant::now();
        let response = request.await.map_err(|e| Attempt::Failed(e.into()))?;
        let status = response.status();
        // 503 is left to the body classifier: the provider also uses it for
        // quota errors, which must not be retried on one token.
        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                Err(Attempt::Refused {
                    response,
                    retry_after: None,
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(Attempt::Refused {
                    response,
                    retry_after,
                })
            }
            _ => {
                if status.is_success() {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_success(endpoint, started.elapsed());
                    }
                }
                Ok(response)
            }
        }
    }

    /// Map a non-success response to the matching error, using the provider error body when present.
    async fn check_response(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> DebridDavResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.map_err(|e| {
            DebridDavError::NetworkError(format!("Failed to read error response body: {}", e))
        })?;
        let err = classify_provider_error(status.as_u16(), &body);
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(endpoint, &err.to_string());
            if err.is_bandwidth_limit() {
                metrics.record_bandwidth_limit();
            }
        }
        Err(err)
    }

    /// Decode a JSON body against its schema. A mismatching shape counts as a
    /// bad gateway answer, which callers treat as transient.
    async fn decode<T: serde::de::DeserializeOwned>(
        endpoint: &str,
        response: reqwest::Response,
    ) -> DebridDavResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| DebridDavError::ApiError {
            status: 502,
            message: format!("Unexpected response from {}: {}", endpoint, e),
        })
    }

    /// Generic authenticated GET request that returns JSON
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        url: &str,
        token: &str,
    ) -> DebridDavResult<T> {
        let response = self
            .execute_with_retry(endpoint, || self.client.get(url).bearer_auth(token).send())
            .await?;
        let response = self.check_response(endpoint, response).await?;
        Self::decode(endpoint, response).await
    }

    // =========================================================================
    // Torrent catalog
    // =========================================================================

    /// List every torrent on the account, page by page.
    ///
    /// `progress` is called after each page with `(fetched, total)`; the total
    /// is only known when the provider sends `X-Total-Count`.
    #[instrument(skip(self, token, progress), fields(api_op = "list_torrents"))]
    pub async fn list_torrents<P>(&self, token: &str, progress: P) -> DebridDavResult<Vec<TorrentSummary>>
    where
        P: Fn(usize, Option<usize>),
    {
        let mut torrents: Vec<TorrentSummary> = Vec::new();
        let mut page = 1usize;

        loop {
            let url = format!(
                "{}/torrents?page={}&limit={}",
                self.base_url, page, self.page_size
            );
            let response = self
                .execute_with_retry("/torrents", || self.client.get(&url).bearer_auth(token).send())
                .await?;

            if response.status() == StatusCode::NO_CONTENT {
                trace!(api_op = "list_torrents", page = page, "No more pages");
                break;
            }

            let total = response
                .headers()
                .get("x-total-count")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());

            let response = self.check_response("/torrents", response).await?;
            let batch: Vec<TorrentSummary> = Self::decode("/torrents", response).await?;
            let batch_len = batch.len();
            torrents.extend(batch);
            progress(torrents.len(), total);

            let reached_total = total.is_some_and(|t| torrents.len() >= t);
            if batch_len < self.page_size || batch_len == 0 || reached_total {
                break;
            }
            page += 1;
        }

        debug!(api_op = "list_torrents", count = torrents.len(), pages = page);
        Ok(torrents)
    }

    /// Full detail of one torrent: files, selection and links.
    #[instrument(skip(self, token), fields(api_op = "get_torrent_info", id = %id))]
    pub async fn get_torrent_info(&self, token: &str, id: &str) -> DebridDavResult<TorrentInfo> {
        let url = format!("{}/torrents/info/{}", self.base_url, id);
        let resp: TorrentInfoResponse = self.get_json("/torrents/info", &url, token).await?;
        debug!(
            api_op = "get_torrent_info",
            id = %id,
            files = resp.files.len(),
            progress = resp.progress
        );
        Ok(resp.into())
    }

    /// Turn a restricted provider link into a direct download URL.
    #[instrument(skip(self, token), fields(api_op = "unrestrict_link"))]
    pub async fn unrestrict_link(&self, token: &str, link: &str) -> DebridDavResult<UnrestrictResponse> {
        let url = format!("{}/unrestrict/link", self.base_url);
        let endpoint = "/unrestrict/link";
        let response = self
            .execute_with_retry(endpoint, || {
                self.client
                    .post(&url)
                    .bearer_auth(token)
                    .form(&[("link", link)])
                    .send()
            })
            .await?;
        let response = self.check_response(endpoint, response).await?;
        let resp: UnrestrictResponse = Self::decode(endpoint, response).await?;
        trace!(api_op = "unrestrict_link", filesize = resp.filesize);
        Ok(resp)
    }

    /// Delete a torrent from the account. Already-deleted counts as success.
    #[instrument(skip(self, token), fields(api_op = "delete_torrent", id = %id))]
    pub async fn delete_torrent(&self, token: &str, id: &str) -> DebridDavResult<()> {
        let url = format!("{}/torrents/delete/{}", self.base_url, id);
        let endpoint = "/torrents/delete";
        let response = self
            .execute_with_retry(endpoint, || self.client.delete(&url).bearer_auth(token).send())
            .await?;

        match self.check_response(endpoint, response).await {
            Ok(_) => {
                info!(api_op = "delete_torrent", id = %id, "Torrent deleted remotely");
                Ok(())
            }
            Err(DebridDavError::NotFound(_)) => {
                debug!(api_op = "delete_torrent", id = %id, "Torrent already gone remotely");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Account
    // =========================================================================

    #[instrument(skip(self, token), fields(api_op = "get_user"))]
    pub async fn get_user(&self, token: &str) -> DebridDavResult<UserInfo> {
        let url = format!("{}/user", self.base_url);
        self.get_json("/user", &url, token).await
    }

    #[instrument(skip(self, token), fields(api_op = "get_traffic"))]
    pub async fn get_traffic(&self, token: &str) -> DebridDavResult<TrafficInfo> {
        let url = format!("{}/traffic", self.base_url);
        self.get_json("/traffic", &url, token).await
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Open a download URL, forwarding `range` verbatim.
    ///
    /// Only the wait for response headers is bounded; the body has no
    /// deadline. The raw response is returned whatever its status.
    #[instrument(skip(self, auth_header), fields(api_op = "open_stream", range = ?range))]
    pub async fn open_stream(
        &self,
        url: &str,
        range: Option<&str>,
        auth_header: Option<&str>,
    ) -> DebridDavResult<reqwest::Response> {
        let mut request = self.stream_client.get(url);
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range);
        }
        if let Some(auth) = auth_header {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        match tokio::time::timeout(self.header_timeout, request.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DebridDavError::TimedOut(format!(
                "no response headers within {:?}",
                self.header_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_client(uri: String, page_size: usize) -> DebridClient {
        DebridClient::with_config(
            uri,
            RetryPolicy::new(2, Duration::from_millis(10)),
            Duration::from_secs(5),
            page_size,
            Some(Arc::new(ApiMetrics::new())),
        )
        .unwrap()
    }

    fn summary(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "filename": format!("{}.mkv", id),
            "hash": "h",
            "bytes": 10,
            "status": "downloaded",
            "progress": 100,
            "added": "2024-01-01T00:00:00.000Z",
            "links": ["https://rd/d/1"]
        })
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            DebridClient::new("not a url"),
            Err(DebridDavError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_list_torrents_paginates_with_progress() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 2);

        Mock::given(method("GET"))
            .and(path("/torrents"))
            .and(query_param("page", "1"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-count", "3")
                    .set_body_json(vec![summary("a"), summary("b")]),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/torrents"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-total-count", "3")
                    .set_body_json(vec![summary("c")]),
            )
            .mount(&mock_server)
            .await;

        let seen = Mutex::new(Vec::new());
        let torrents = client
            .list_torrents("tok", |fetched, total| {
                seen.lock().unwrap().push((fetched, total))
            })
            .await
            .unwrap();

        assert_eq!(torrents.len(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![(2, Some(3)), (3, Some(3))]);
    }

    #[tokio::test]
    async fn test_list_torrents_no_content_is_empty() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/torrents"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let torrents = client.list_torrents("tok", |_, _| {}).await.unwrap();
        assert!(torrents.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_transient_gateway_error() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/torrents/info/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&mock_server)
            .await;

        let err = client.get_torrent_info("tok", "abc").await.unwrap_err();
        assert!(matches!(err, DebridDavError::ApiError { status: 502, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_get_torrent_info_not_found() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/torrents/info/gone"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "unknown_ressource", "error_code": 7})),
            )
            .mount(&mock_server)
            .await;

        let err = client.get_torrent_info("tok", "gone").await.unwrap_err();
        assert!(matches!(err, DebridDavError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unrestrict_bandwidth_limit() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("POST"))
            .and(path("/unrestrict/link"))
            .and(body_string_contains("link="))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({"error": "fair_usage_limit", "error_code": 36})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = client
            .unrestrict_link("tok", "https://rd/d/1")
            .await
            .unwrap_err();
        assert!(err.is_bandwidth_limit());
        assert_eq!(
            client
                .metrics
                .as_ref()
                .unwrap()
                .bandwidth_limits
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_unrestrict_success() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("POST"))
            .and(path("/unrestrict/link"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "X1",
                "filename": "a.mkv",
                "mimeType": "video/x-matroska",
                "filesize": 1000,
                "link": "https://rd/d/1",
                "download": "https://cdn/a.mkv"
            })))
            .mount(&mock_server)
            .await;

        let resp = client.unrestrict_link("tok", "https://rd/d/1").await.unwrap();
        assert_eq!(resp.download, "https://cdn/a.mkv");
        assert_eq!(resp.mime_type.as_deref(), Some("video/x-matroska"));
    }

    #[tokio::test]
    async fn test_retry_on_server_error() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 1,
                "username": "u",
                "email": "u@example.com",
                "points": 10,
                "type": "premium",
                "premium": 3600,
                "expiration": "2030-01-01T00:00:00.000Z"
            })))
            .mount(&mock_server)
            .await;

        let user = client.get_user("tok").await.unwrap();
        assert_eq!(user.account_type, "premium");
    }

    #[tokio::test]
    async fn test_rate_limit_with_retry_after_header() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/traffic"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/traffic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "host.example": {"left": 100, "bytes": 5, "links": 1, "limit": 200, "type": "gigabytes", "reset": "daily"}
            })))
            .mount(&mock_server)
            .await;

        let start = Instant::now();
        let traffic = client.get_traffic("tok").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(traffic["host.example"].left, Some(100));
    }

    #[tokio::test]
    async fn test_exhausted_retries_classify_last_response() {
        let mock_server = MockServer::start().await;
        let metrics = Arc::new(ApiMetrics::new());
        let client = DebridClient::with_config(
            mock_server.uri(),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(5),
            100,
            Some(Arc::clone(&metrics)),
        )
        .unwrap();

        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&mock_server)
            .await;

        let err = client.get_user("tok").await.unwrap_err();
        assert!(matches!(err, DebridDavError::ApiError { status: 502, .. }), "{:?}", err);
        assert_eq!(metrics.retry_count.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_delete_torrent_treats_not_found_as_done() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("DELETE"))
            .and(path("/torrents/delete/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/torrents/delete/denied"))
            .respond_with(ResponseTemplate::new(403).set_body_string("nope"))
            .mount(&mock_server)
            .await;

        assert!(client.delete_torrent("tok", "gone").await.is_ok());
        assert!(client.delete_torrent("tok", "denied").await.is_err());
    }

    #[tokio::test]
    async fn test_open_stream_forwards_range() {
        let mock_server = MockServer::start().await;
        let client = fast_client(mock_server.uri(), 100);

        Mock::given(method("GET"))
            .and(path("/file.mkv"))
            .and(header("range", "bytes=0-9"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![1u8; 10]))
            .mount(&mock_server)
            .await;

        let url = format!("{}/file.mkv", mock_server.uri());
        let resp = client.open_stream(&url, Some("bytes=0-9"), None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    }
}
