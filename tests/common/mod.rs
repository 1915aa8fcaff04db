//! Common test utilities for debrid-dav
//!
//! - `mock_server`: WireMock stand-ins for the provider API and its download hosts
//! - `fixtures`: provider JSON bodies and file contents
//!
//! [`TestApp`] wires a filesystem and the full router against a mock server.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_server;

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::MockServer;

use debrid_dav::mount::{MountSupervisor, SystemProcessControl};
use debrid_dav::store::SqliteRepairStore;
use debrid_dav::{create_router, AppState, Config, DebridFs, Metrics};

pub const ALL_DIR: &str = "__all__";

/// Config pointing at `api_url` with one token, fast retries and no
/// background repair.
pub fn test_config(api_url: &str) -> Config {
    let mut config = Config::default();
    config.api.url = api_url.to_string();
    config.api.tokens = vec!["token-a".to_string()];
    config.api.max_retries = 1;
    config.api.retry_delay_ms = 1;
    config.repair.enabled = false;
    config.refresh.interval_secs = 0;
    config.stream.buffer_size = 256;
    config
}

pub struct TestApp {
    pub server: MockServer,
    pub fs: Arc<DebridFs>,
    pub router: Router,
}

impl TestApp {
    pub fn new(server: MockServer, config: Config) -> Self {
        let fs = Arc::new(
            DebridFs::new(
                config.clone(),
                Arc::new(SqliteRepairStore::in_memory().unwrap()),
                Arc::new(Metrics::new()),
            )
            .unwrap(),
        );
        let mounts = Arc::new(MountSupervisor::new(
            config.mount.clone(),
            "http://127.0.0.1:1/",
            Arc::clone(fs.catalog()),
            Arc::new(SystemProcessControl::new()),
        ));
        let router = create_router(Arc::new(AppState::new(Arc::clone(&fs), mounts)));
        Self { server, fs, router }
    }

    /// App against `server` with the default test config, catalog loaded.
    pub async fn loaded(server: MockServer) -> Self {
        let config = test_config(&server.uri());
        let app = Self::new(server, config);
        app.fs.prefetch().await.unwrap();
        app
    }

    pub async fn send(&self, method: &str, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
        send(&self.router, method, uri, headers).await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(router: &Router, method: &str, uri: &str, headers: &[(&str, &str)]) -> TestResponse {
    let mut builder = Request::builder()
        .method(Method::from_bytes(method.as_bytes()).unwrap())
        .uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}
