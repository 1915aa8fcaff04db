//! Provider response bodies and file contents used across the tests.

use serde_json::{json, Value};

pub const FILE_SIZE: usize = 1000;

/// Deterministic file body: byte `i` is `i % 251`.
pub fn file_body() -> Vec<u8> {
    (0..FILE_SIZE).map(|i| (i % 251) as u8).collect()
}

/// One `GET /torrents` entry.
pub fn summary(id: &str, filename: &str, links: usize) -> Value {
    json!({
        "id": id,
        "filename": filename,
        "hash": format!("hash-{}", id),
        "bytes": FILE_SIZE,
        "status": "downloaded",
        "progress": 100,
        "added": "2024-01-01T00:00:00.000Z",
        "ended": "2024-01-01T01:00:00.000Z",
        "links": (0..links).map(|i| format!("https://rd/d/{}{}", id, i)).collect::<Vec<_>>()
    })
}

/// `GET /torrents/info/{id}` for a single-file torrent.
pub fn single_file_info(id: &str, filename: &str) -> Value {
    json!({
        "id": id,
        "filename": filename,
        "hash": format!("hash-{}", id),
        "bytes": FILE_SIZE,
        "status": "downloaded",
        "progress": 100,
        "added": "2024-01-01T00:00:00.000Z",
        "ended": "2024-01-01T01:00:00.000Z",
        "files": [{"id": 1, "path": format!("/{}", filename), "bytes": FILE_SIZE, "selected": 1}],
        "links": [format!("https://rd/d/{}0", id)]
    })
}

/// Season pack: two selected episodes and one unselected sample.
pub fn season_info(id: &str) -> Value {
    json!({
        "id": id,
        "filename": "Show.S01",
        "hash": format!("hash-{}", id),
        "bytes": 3 * FILE_SIZE,
        "status": "downloaded",
        "progress": 100,
        "added": "2024-02-01T00:00:00.000Z",
        "files": [
            {"id": 1, "path": "/Show.S01/Show.S01E01.mkv", "bytes": FILE_SIZE, "selected": 1},
            {"id": 2, "path": "/Show.S01/Show.S01E02.mkv", "bytes": FILE_SIZE, "selected": 1},
            {"id": 3, "path": "/Show.S01/Sample/sample.mkv", "bytes": 10, "selected": 0}
        ],
        "links": [format!("https://rd/d/{}0", id), format!("https://rd/d/{}1", id)]
    })
}

/// `POST /unrestrict/link` answer pointing at `download`.
pub fn unrestricted(filename: &str, download: &str) -> Value {
    json!({
        "id": "U1",
        "filename": filename,
        "mimeType": "video/x-matroska",
        "filesize": FILE_SIZE,
        "link": "https://rd/d/abc0",
        "download": download
    })
}

pub fn provider_error(error: &str, code: i64) -> Value {
    json!({"error": error, "error_code": code})
}
