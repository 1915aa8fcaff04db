//! WireMock stand-ins for the provider API and its download host.

use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::fixtures;

/// Provider with one torrent, `Movie.2020.mkv` (id `abc`), whose download
/// host ignores `Range` and always sends the whole body.
pub async fn setup_movie_server() -> MockServer {
    let server = MockServer::start().await;
    mount_listing(&server, vec![fixtures::summary("abc", "Movie.2020.mkv", 1)]).await;
    mount_info(&server, "abc", fixtures::single_file_info("abc", "Movie.2020.mkv")).await;
    let download = format!("{}/dl/abc", server.uri());
    mount_unrestrict(&server, &download).await;
    mount_download(&server, "/dl/abc").await;
    server
}

pub async fn mount_listing(server: &MockServer, torrents: Vec<serde_json::Value>) {
    let total = torrents.len();
    Mock::given(method("GET"))
        .and(path("/torrents"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-total-count", total.to_string().as_str())
                .set_body_json(serde_json::Value::Array(torrents)),
        )
        .mount(server)
        .await;
}

pub async fn mount_info(server: &MockServer, id: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/torrents/info/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_unrestrict(server: &MockServer, download: &str) {
    Mock::given(method("POST"))
        .and(path("/unrestrict/link"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::unrestricted("Movie.2020.mkv", download)),
        )
        .mount(server)
        .await;
}

/// Full body on every request, `Range` or not.
pub async fn mount_download(server: &MockServer, at: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "video/x-matroska")
                .set_body_bytes(fixtures::file_body()),
        )
        .mount(server)
        .await;
}

/// Honors an open-ended `bytes=start-` with a 206.
pub async fn mount_ranged_download(server: &MockServer, at: &str, start: usize) {
    let body = fixtures::file_body();
    Mock::given(method("GET"))
        .and(path(at))
        .and(header("range", format!("bytes={}-", start).as_str()))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes {}-{}/{}", start, body.len() - 1, body.len()).as_str(),
                )
                .set_body_bytes(body[start..].to_vec()),
        )
        .with_priority(1)
        .mount(server)
        .await;
}

pub async fn mount_delete(server: &MockServer, status: u16) {
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/torrents/delete/.+$"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}
