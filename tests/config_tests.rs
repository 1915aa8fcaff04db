use std::io::Write;
use std::path::PathBuf;

use axum::http::StatusCode;
use debrid_dav::config::{CliArgs, Config};
use debrid_dav::DebridDavError;

fn write_config(content: &str, ext: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("debrid-dav.{}", ext));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn test_zero_buffer_size_fails_validation() {
    let mut config = Config::default();
    config.stream.buffer_size = 0;
    let err = config.validate().unwrap_err();
    assert!(matches!(err, DebridDavError::ValidationError(_)));
    assert_eq!(err.to_status_code(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_zero_link_ttl_fails_validation() {
    let mut config = Config::default();
    config.cache.link_ttl = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_bad_api_url_is_reported_with_field() {
    let mut config = Config::default();
    config.api.url = "not a url".to_string();
    match config.validate() {
        Err(DebridDavError::ValidationError(issues)) => {
            assert!(issues.iter().any(|i| i.field == "api.url"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_disabled_api_keeps_tokens_but_is_not_remote() {
    let mut config = Config::default();
    config.api.tokens = vec!["t".to_string()];
    assert!(config.remote_enabled());
    config.api.enabled = false;
    assert!(!config.remote_enabled());
    // Still a valid configuration; requests needing the remote are rejected later.
    assert!(config.validate().is_ok());
}

#[test]
fn test_file_sections_keep_defaults_for_missing_fields() {
    let (_dir, path) = write_config(
        r#"
[api]
tokens = ["abc"]

[mount]
mount_point = "/srv/media"
cache_mode = "writes"
"#,
        "toml",
    );
    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.api.tokens, vec!["abc"]);
    assert_eq!(config.api.url, Config::default().api.url);
    assert_eq!(config.mount.mount_point, PathBuf::from("/srv/media"));
    assert_eq!(config.mount.cache_mode, "writes");
    assert_eq!(config.mount.buffer_size, Config::default().mount.buffer_size);
    assert_eq!(config.repair.workers, Config::default().repair.workers);
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let (_dir, path) = write_config("[api\ntokens = ", "toml");
    assert!(matches!(
        Config::from_file(&path),
        Err(DebridDavError::ParseError(_))
    ));

    let (_dir, path) = write_config("{\"api\": ", "json");
    assert!(matches!(
        Config::from_file(&path),
        Err(DebridDavError::ParseError(_))
    ));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let path = PathBuf::from("/definitely/not/here/debrid-dav.toml");
    assert!(matches!(Config::from_file(&path), Err(DebridDavError::IoError(_))));
}

// Environment variables are process-wide, so every env-dependent assertion
// lives in this one test.
#[test]
fn test_precedence_file_then_env_then_cli() {
    let (_dir, path) = write_config(
        r#"
[api]
url = "http://file.example"
tokens = ["from-file"]

[server]
port = 1111

[logging]
level = "warn"
"#,
        "toml",
    );

    std::env::set_var("DEBRID_DAV_TOKENS", "env-one, env-two,,");
    std::env::set_var("DEBRID_DAV_PORT", "2222");
    std::env::set_var("DEBRID_DAV_FALLBACK_USERPASS", "user:p4ss");

    let cli = CliArgs {
        config_file: Some(path.clone()),
        port: Some(3333),
        ..Default::default()
    };
    let config = Config::load_with_cli(&cli).unwrap();
    assert_eq!(config.api.url, "http://file.example");
    assert_eq!(config.api.tokens, vec!["env-one", "env-two"]);
    assert_eq!(config.server.port, 3333);
    assert_eq!(config.logging.level, "warn");
    assert_eq!(config.fallback.username.as_deref(), Some("user"));
    assert_eq!(config.fallback.password.as_deref(), Some("p4ss"));

    std::env::set_var("DEBRID_DAV_PORT", "not-a-port");
    let err = Config::load_with_cli(&cli).unwrap_err();
    assert!(matches!(err, DebridDavError::InvalidArgument(_)));

    std::env::remove_var("DEBRID_DAV_TOKENS");
    std::env::remove_var("DEBRID_DAV_PORT");
    std::env::remove_var("DEBRID_DAV_FALLBACK_USERPASS");

    let cli = CliArgs {
        config_file: Some(path),
        tokens: vec!["from-cli".to_string()],
        ..Default::default()
    };
    let config = Config::load_with_cli(&cli).unwrap();
    assert_eq!(config.api.tokens, vec!["from-cli"]);
    assert_eq!(config.server.port, 1111);
}
