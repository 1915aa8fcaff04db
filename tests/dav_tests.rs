mod common;

use axum::http::StatusCode;
use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::fixtures::{self, FILE_SIZE};
use common::mock_server::{self, setup_movie_server};
use common::{test_config, TestApp, ALL_DIR};
use debrid_dav::api::TorrentSummary;
use debrid_dav::DebridDavError;

const MOVIE_DIR: &str = "/__all__/Movie.2020.mkv/";
const MOVIE_FILE: &str = "/__all__/Movie.2020.mkv/Movie.2020.mkv";

/// Number of `<response>` elements in a multistatus body.
fn responses(xml: &str) -> usize {
    xml.matches("response>").count() / 2
}

#[tokio::test]
async fn test_browse_and_read_single_movie() {
    let app = TestApp::loaded(setup_movie_server().await).await;

    let root = app.send("PROPFIND", "/", &[("depth", "1")]).await;
    assert_eq!(root.status, StatusCode::MULTI_STATUS);
    assert!(root.text().contains(&format!("/{}/<", ALL_DIR)));

    let all = app.send("PROPFIND", "/__all__/", &[("depth", "1")]).await;
    assert_eq!(all.status, StatusCode::MULTI_STATUS);
    let xml = all.text();
    assert!(xml.contains(&format!("{}<", MOVIE_DIR)));

    let torrent = app.send("PROPFIND", MOVIE_DIR, &[("depth", "1")]).await;
    assert_eq!(torrent.status, StatusCode::MULTI_STATUS);
    let xml = torrent.text();
    // The collection itself plus its one file.
    assert_eq!(responses(&xml), 2);
    assert!(xml.contains(&format!("{}<", MOVIE_FILE)));
    assert!(xml.contains(&format!(">{}<", FILE_SIZE)));

    let get = app.send("GET", MOVIE_FILE, &[]).await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.header("content-length"), Some("1000"));
    assert_eq!(get.body.as_ref(), fixtures::file_body().as_slice());
}

#[tokio::test]
async fn test_depth_zero_lists_only_the_collection() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("PROPFIND", "/__all__/", &[("depth", "0")]).await;
    assert_eq!(resp.status, StatusCode::MULTI_STATUS);
    assert_eq!(responses(&resp.text()), 1);
}

#[tokio::test]
async fn test_range_served_from_full_body_when_upstream_ignores_it() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("GET", MOVIE_FILE, &[("range", "bytes=100-199")]).await;

    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.header("content-range"), Some("bytes 100-199/1000"));
    assert_eq!(resp.body.len(), 100);
    assert_eq!(resp.body.as_ref(), &fixtures::file_body()[100..200]);
}

#[tokio::test]
async fn test_range_passed_through_when_upstream_honors_it() {
    let server = setup_movie_server().await;
    mock_server::mount_ranged_download(&server, "/dl/abc", 100).await;
    let app = TestApp::loaded(server).await;

    let resp = app.send("GET", MOVIE_FILE, &[("range", "bytes=100-199")]).await;
    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.header("content-range"), Some("bytes 100-199/1000"));
    assert_eq!(resp.body.as_ref(), &fixtures::file_body()[100..200]);
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("GET", MOVIE_FILE, &[("range", "bytes=5000-6000")]).await;
    assert_eq!(resp.status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_etag_is_shared_by_head_and_get_and_honored() {
    let app = TestApp::loaded(setup_movie_server().await).await;

    let head = app.send("HEAD", MOVIE_FILE, &[]).await;
    assert_eq!(head.status, StatusCode::OK);
    assert!(head.body.is_empty());
    assert_eq!(head.header("content-length"), Some("1000"));
    let etag = head.header("etag").unwrap().to_string();

    let get = app.send("GET", MOVIE_FILE, &[]).await;
    assert_eq!(get.header("etag"), Some(etag.as_str()));

    let cached = app.send("GET", MOVIE_FILE, &[("if-none-match", &etag)]).await;
    assert_eq!(cached.status, StatusCode::NOT_MODIFIED);
    assert!(cached.body.is_empty());
}

#[tokio::test]
async fn test_listing_excludes_unselected_and_quarantined_files() {
    let server = MockServer::start().await;
    mock_server::mount_listing(&server, vec![fixtures::summary("s01", "Show.S01", 2)]).await;
    mock_server::mount_info(&server, "s01", fixtures::season_info("s01")).await;
    let app = TestApp::loaded(server).await;

    let before = app.send("PROPFIND", "/__all__/Show.S01/", &[("depth", "1")]).await;
    let xml = before.text();
    assert!(xml.contains("Show.S01E01.mkv"));
    assert!(xml.contains("Show.S01E02.mkv"));
    assert!(!xml.contains("sample.mkv"));

    let err = DebridDavError::ContentUnavailable {
        reason: "no_links".to_string(),
        message: "no link for file".to_string(),
    };
    app.fs.caches().quarantine_file("s01", "Show.S01E02.mkv", &err).await;

    let after = app.send("PROPFIND", "/__all__/Show.S01/", &[("depth", "1")]).await;
    let xml = after.text();
    assert!(xml.contains("Show.S01E01.mkv"));
    assert!(!xml.contains("Show.S01E02.mkv"));

    let direct = app.send("GET", "/__all__/Show.S01/Show.S01E02.mkv", &[]).await;
    assert_eq!(direct.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_then_prefetch_restores_torrent() {
    let server = setup_movie_server().await;
    mock_server::mount_delete(&server, 204).await;
    let app = TestApp::loaded(server).await;

    let deleted = app.send("DELETE", MOVIE_DIR, &[]).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);

    let gone = app.send("PROPFIND", MOVIE_DIR, &[("depth", "1")]).await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);

    // The mock provider still lists it, so the next refresh brings it back.
    app.fs.prefetch().await.unwrap();
    let back = app.send("PROPFIND", MOVIE_DIR, &[("depth", "1")]).await;
    assert_eq!(back.status, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn test_failed_remote_delete_keeps_torrent() {
    let server = setup_movie_server().await;
    mock_server::mount_delete(&server, 500).await;
    let app = TestApp::loaded(server).await;

    let resp = app.send("DELETE", MOVIE_DIR, &[]).await;
    assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
    let still = app.send("PROPFIND", MOVIE_DIR, &[("depth", "0")]).await;
    assert_eq!(still.status, StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    assert_eq!(app.send("DELETE", "/", &[]).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.send("DELETE", "/__all__/", &[]).await.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_options_advertises_webdav() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("OPTIONS", "/", &[]).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.header("dav").unwrap().contains('1'));
    let allow = resp.header("allow").unwrap();
    assert!(allow.contains("PROPFIND"));
    assert!(allow.contains("DELETE"));
}

#[tokio::test]
async fn test_unsupported_methods_are_not_implemented() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    for m in ["PUT", "MKCOL", "MOVE", "PROPPATCH"] {
        let resp = app.send(m, MOVIE_FILE, &[]).await;
        assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED, "{}", m);
    }
}

#[tokio::test]
async fn test_unknown_paths_are_not_found() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    assert_eq!(
        app.send("PROPFIND", "/elsewhere/", &[("depth", "1")]).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.send("PROPFIND", "/__all__/Missing/", &[("depth", "1")]).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.send("GET", "/__all__/Movie.2020.mkv/other.mkv", &[]).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_collection_get_is_not_allowed() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("GET", MOVIE_DIR, &[]).await;
    assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_without_token_file_access_is_a_client_error() {
    let server = setup_movie_server().await;
    let mut config = test_config(&server.uri());
    config.api.tokens.clear();
    let app = TestApp::new(server, config);
    let summary: TorrentSummary =
        serde_json::from_value(fixtures::summary("abc", "Movie.2020.mkv", 1)).unwrap();
    app.fs.catalog().upsert(summary.into_item(Utc::now()));

    // Listing works from the catalog alone; reading needs the remote.
    let listed = app.send("PROPFIND", "/__all__/", &[("depth", "1")]).await;
    assert_eq!(listed.status, StatusCode::MULTI_STATUS);
    let resp = app.send("GET", MOVIE_FILE, &[]).await;
    assert!(resp.status.is_client_error());
}

#[tokio::test]
async fn test_stale_link_is_resolved_again() {
    let server = MockServer::start().await;
    mock_server::mount_listing(&server, vec![fixtures::summary("abc", "Movie.2020.mkv", 1)]).await;
    mock_server::mount_info(&server, "abc", fixtures::single_file_info("abc", "Movie.2020.mkv")).await;

    let stale = format!("{}/dl/stale", server.uri());
    let fresh = format!("{}/dl/fresh", server.uri());
    Mock::given(method("POST"))
        .and(path("/unrestrict/link"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::unrestricted("Movie.2020.mkv", &stale)),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mock_server::mount_unrestrict(&server, &fresh).await;
    Mock::given(method("GET"))
        .and(path("/dl/stale"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mock_server::mount_download(&server, "/dl/fresh").await;

    let app = TestApp::loaded(server).await;
    let resp = app.send("GET", MOVIE_FILE, &[]).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body.len(), FILE_SIZE);
}

#[tokio::test]
async fn test_propfind_memo_is_reused() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let first = app.send("PROPFIND", MOVIE_DIR, &[("depth", "1")]).await;
    let second = app.send("PROPFIND", MOVIE_DIR, &[("depth", "1")]).await;
    assert_eq!(first.body, second.body);

    let stats = app.fs.metrics().snapshot();
    assert_eq!(stats.dav.propfind_memo_hits, 1);
}

#[tokio::test]
async fn test_percent_encoded_names_resolve() {
    let server = MockServer::start().await;
    mock_server::mount_listing(&server, vec![fixtures::summary("sp", "My Movie (2020)", 1)]).await;
    mock_server::mount_info(&server, "sp", fixtures::single_file_info("sp", "My Movie (2020).mkv")).await;
    let app = TestApp::loaded(server).await;

    let all = app.send("PROPFIND", "/__all__/", &[("depth", "1")]).await;
    assert!(all.text().contains("/__all__/My%20Movie%20"));

    let dir = app.send("PROPFIND", "/__all__/My%20Movie%20%282020%29/", &[("depth", "1")]).await;
    assert_eq!(dir.status, StatusCode::MULTI_STATUS);
    let xml = dir.text();
    assert_eq!(responses(&xml), 2);
    assert!(xml.contains("2020).mkv<") || xml.contains("2020%29.mkv<"));
}

#[tokio::test]
async fn test_seek_past_start_reads_the_tail() {
    let app = TestApp::loaded(setup_movie_server().await).await;
    let resp = app.send("GET", MOVIE_FILE, &[("range", "bytes=-10")]).await;
    assert_eq!(resp.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.body.as_ref(), &fixtures::file_body()[990..]);

    let stats = app.fs.metrics().snapshot();
    assert_eq!(stats.dav.bytes_streamed, 10);
}

#[tokio::test]
async fn test_head_does_not_open_the_download() {
    let server = setup_movie_server().await;
    let app = TestApp::loaded(server).await;
    let head = app.send("HEAD", MOVIE_FILE, &[]).await;
    assert_eq!(head.status, StatusCode::OK);

    let requests = app.server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| !r.url.path().starts_with("/dl/")));
}
