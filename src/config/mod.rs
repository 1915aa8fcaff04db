//! Configuration management for CLI, environment variables, and config files.

use crate::error::{DebridDavError, ValidationIssue};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for debrid-dav.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub mount: MountConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the debrid provider's REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub url: String,
    /// Bearer tokens; the first one owns the torrent catalog.
    pub tokens: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub page_size: usize,
    /// An exhausted token is tried again after this long.
    pub token_reset_secs: u64,
}

/// Direct file access on the provider, used when the API cannot resolve a link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Name of the synthetic collection holding every torrent.
    pub all_dir: String,
}

/// TTLs and capacities of the caching tier, in seconds / entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub link_ttl: u64,
    pub failed_file_ttl: u64,
    pub broken_torrent_ttl: u64,
    pub info_ttl: u64,
    pub dav_ttl: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub buffer_size: usize,
    /// Bounds the wait for upstream response headers; the body has no timeout.
    pub header_timeout_secs: u64,
}

/// Defaults for the external mount process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub rclone_path: PathBuf,
    pub mount_point: PathBuf,
    pub auto_mount: bool,
    pub cache_mode: String,
    pub buffer_size: String,
    pub poll_interval: String,
    pub log_level: String,
    pub wait_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "https://api.real-debrid.com/rest/1.0".to_string(),
            tokens: Vec::new(),
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
            page_size: 2500,
            token_reset_secs: 3600,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 9999,
            all_dir: "__all__".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            link_ttl: 24 * 3600,
            failed_file_ttl: 3600,
            broken_torrent_ttl: 3600,
            info_ttl: 6 * 3600,
            dav_ttl: 6 * 3600,
            max_entries: 50_000,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 3600,
            workers: 2,
            queue_capacity: 1000,
            database_path: PathBuf::from("debrid-dav.db"),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            header_timeout_secs: 30,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            rclone_path: PathBuf::from("rclone"),
            mount_point: PathBuf::from("/mnt/debrid"),
            auto_mount: false,
            cache_mode: "full".to_string(),
            buffer_size: "64M".to_string(),
            poll_interval: "1m".to_string(),
            log_level: "INFO".to_string(),
            wait_poll_secs: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.link_ttl)
    }

    pub fn failed_file_ttl(&self) -> Duration {
        Duration::from_secs(self.failed_file_ttl)
    }

    pub fn broken_torrent_ttl(&self) -> Duration {
        Duration::from_secs(self.broken_torrent_ttl)
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, DebridDavError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DebridDavError::IoError(e.to_string()))?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| DebridDavError::ParseError(e.to_string())),
            _ => toml::from_str(&content).map_err(|e| DebridDavError::ParseError(e.to_string())),
        }
    }

    pub fn from_default_locations() -> Result<Self, DebridDavError> {
        let config_dirs = [
            dirs::config_dir().map(|d| d.join("debrid-dav/config.toml")),
            Some(PathBuf::from("/etc/debrid-dav/config.toml")),
            Some(PathBuf::from("./debrid-dav.toml")),
        ];

        for path in config_dirs.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        Ok(Self::default())
    }

    pub fn merge_from_env(mut self) -> Result<Self, DebridDavError> {
        fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T, DebridDavError> {
            val.parse()
                .map_err(|_| DebridDavError::InvalidArgument(format!("{} has invalid format", name)))
        }

        if let Ok(val) = std::env::var("DEBRID_DAV_API_URL") {
            self.api.url = val;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_TOKENS") {
            self.api.tokens = val
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_ENABLED") {
            self.api.enabled = parse_env("DEBRID_DAV_ENABLED", &val)?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_PORT") {
            self.server.port = parse_env("DEBRID_DAV_PORT", &val)?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_HOST") {
            self.server.host = parse_env("DEBRID_DAV_HOST", &val)?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_LINK_TTL") {
            self.cache.link_ttl = parse_env("DEBRID_DAV_LINK_TTL", &val)?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_REFRESH_INTERVAL") {
            self.refresh.interval_secs = parse_env("DEBRID_DAV_REFRESH_INTERVAL", &val)?;
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_DATABASE") {
            self.repair.database_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_MOUNT_POINT") {
            self.mount.mount_point = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("DEBRID_DAV_LOG_LEVEL") {
            self.logging.level = val;
        }

        // Fallback credentials - support both individual fields and combined format
        if let Ok(val) = std::env::var("DEBRID_DAV_FALLBACK_URL") {
            self.fallback.url = Some(val);
        }
        if let Ok(auth_str) = std::env::var("DEBRID_DAV_FALLBACK_USERPASS") {
            if let Some((username, password)) = auth_str.split_once(':') {
                self.fallback.username = Some(username.to_string());
                self.fallback.password = Some(password.to_string());
            }
        } else {
            if let Ok(val) = std::env::var("DEBRID_DAV_FALLBACK_USERNAME") {
                self.fallback.username = Some(val);
            }
            if let Ok(val) = std::env::var("DEBRID_DAV_FALLBACK_PASSWORD") {
                self.fallback.password = Some(val);
            }
        }

        Ok(self)
    }

    pub fn merge_from_cli(mut self, cli: &CliArgs) -> Self {
        if let Some(ref url) = cli.api_url {
            self.api.url = url.clone();
        }
        if !cli.tokens.is_empty() {
            self.api.tokens = cli.tokens.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(ref mount_point) = cli.mount_point {
            self.mount.mount_point = mount_point.clone();
        }
        if let Some(ref database) = cli.database {
            self.repair.database_path = database.clone();
        }
        if let Some(ref level) = cli.log_level {
            self.logging.level = level.clone();
        }

        self
    }

    pub fn load() -> Result<Self, DebridDavError> {
        Self::from_default_locations()?.merge_from_env()
    }

    pub fn load_with_cli(cli: &CliArgs) -> Result<Self, DebridDavError> {
        let base = match cli.config_file {
            Some(ref path) => Self::from_file(path)?,
            None => Self::from_default_locations()?,
        };
        Ok(base.merge_from_env()?.merge_from_cli(cli))
    }

    /// True when the remote API may be called at all.
    pub fn remote_enabled(&self) -> bool {
        self.api.enabled && !self.api.tokens.is_empty()
    }

    pub fn validate(&self) -> Result<(), DebridDavError> {
        let mut issues = Vec::new();
        let mut issue = |field: &str, message: String| {
            issues.push(ValidationIssue {
                field: field.to_string(),
                message,
            })
        };

        if self.api.url.is_empty() {
            issue("api.url", "URL cannot be empty".to_string());
        } else if let Err(e) = reqwest::Url::parse(&self.api.url) {
            issue("api.url", format!("Invalid URL format: {}", e));
        }

        if let Some(ref url) = self.fallback.url {
            if let Err(e) = reqwest::Url::parse(url) {
                issue("fallback.url", format!("Invalid URL format: {}", e));
            }
        }

        if self.api.page_size == 0 {
            issue("api.page_size", "Page size must be positive".to_string());
        }

        if self.cache.link_ttl == 0
            || self.cache.failed_file_ttl == 0
            || self.cache.broken_torrent_ttl == 0
        {
            issue("cache", "TTLs must be positive".to_string());
        }

        if self.stream.buffer_size == 0 {
            issue("stream.buffer_size", "Buffer size must be positive".to_string());
        }

        if self.repair.workers == 0 || self.repair.queue_capacity == 0 {
            issue(
                "repair",
                "Workers and queue capacity must be positive".to_string(),
            );
        }

        if self.server.all_dir.is_empty() || self.server.all_dir.contains('/') {
            issue(
                "server.all_dir",
                "Must be a single non-empty path segment".to_string(),
            );
        }

        if !self.mount.mount_point.is_absolute() {
            issue(
                "mount.mount_point",
                "Mount point must be an absolute path".to_string(),
            );
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            issue(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Valid levels: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(DebridDavError::ValidationError(issues))
        }
    }
}

/// Command-line arguments that override configuration values.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub api_url: Option<String>,
    pub tokens: Vec<String>,
    pub port: Option<u16>,
    pub mount_point: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str, file_name: &str) -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(file_name);
        std::fs::write(&path, content).unwrap();
        Config::from_file(&path).unwrap()
    }

    #[test]
    fn test_defaults_are_valid_but_offline() {
        let config = Config::default();
        assert_eq!(config.api.url, "https://api.real-debrid.com/rest/1.0");
        assert_eq!(config.cache.link_ttl(), Duration::from_secs(24 * 3600));
        assert_eq!(config.server.all_dir, "__all__");
        assert!(config.validate().is_ok());
        // No tokens yet, so nothing may call the provider.
        assert!(!config.remote_enabled());
    }

    #[test]
    fn test_toml_overrides_only_named_fields() {
        let c = parse(
            r#"[api]
url = "http://provider.test/rest/1.0"
tokens = ["one", "two"]

[cache]
link_ttl = 120
failed_file_ttl = 30

[server]
port = 8181
all_dir = "torrents"

[repair]
workers = 4"#,
            "debrid-dav.toml",
        );
        assert_eq!(c.api.tokens, vec!["one", "two"]);
        assert_eq!(c.cache.link_ttl, 120);
        assert_eq!(c.cache.failed_file_ttl, 30);
        assert_eq!(c.cache.broken_torrent_ttl, 3600);
        assert_eq!((c.server.port, c.server.all_dir.as_str()), (8181, "torrents"));
        assert_eq!(c.repair.workers, 4);
        assert_eq!(c.repair.queue_capacity, 1000);
        assert!(c.remote_enabled());
    }

    #[test]
    fn test_json_selected_by_extension() {
        let c = parse(
            r#"{"fallback": {"url": "https://dav.provider.test", "username": "me"}, "stream": {"buffer_size": 1024}}"#,
            "settings.JSON",
        );
        assert_eq!(c.fallback.url.as_deref(), Some("https://dav.provider.test"));
        assert_eq!(c.fallback.username.as_deref(), Some("me"));
        assert_eq!(c.fallback.password, None);
        assert_eq!(c.stream.buffer_size, 1024);
    }

    #[test]
    fn test_cli_wins_over_loaded_values() {
        let mut config = Config::default();
        config.api.tokens = vec!["from-file".to_string()];
        config.logging.level = "warn".to_string();
        let cli = CliArgs {
            tokens: vec!["t1".to_string(), "t2".to_string()],
            port: Some(7000),
            mount_point: Some(PathBuf::from("/srv/debrid")),
            database: Some(PathBuf::from("/var/lib/debrid-dav/repair.db")),
            ..Default::default()
        };

        let merged = config.merge_from_cli(&cli);

        assert_eq!(merged.api.tokens, vec!["t1", "t2"]);
        assert_eq!(merged.server.port, 7000);
        assert_eq!(merged.mount.mount_point, PathBuf::from("/srv/debrid"));
        assert_eq!(
            merged.repair.database_path,
            PathBuf::from("/var/lib/debrid-dav/repair.db")
        );
        // Untouched by the CLI.
        assert_eq!(merged.logging.level, "warn");
    }

    #[test]
    fn test_validate_collects_every_issue() {
        let mut config = Config::default();
        config.api.url = String::new();
        config.api.page_size = 0;
        config.cache.broken_torrent_ttl = 0;
        config.repair.queue_capacity = 0;
        config.server.all_dir = "a/b".to_string();
        config.mount.mount_point = PathBuf::from("mnt/debrid");
        config.fallback.url = Some("::".to_string());
        match config.validate() {
            Err(DebridDavError::ValidationError(issues)) => {
                let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec![
                        "api.url",
                        "fallback.url",
                        "api.page_size",
                        "cache",
                        "repair",
                        "server.all_dir",
                        "mount.mount_point",
                    ]
                );
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_levels_are_lowercase_names() {
        for (level, ok) in [("error", true), ("trace", true), ("ERROR", false), ("verbose", false)] {
            let mut config = Config::default();
            config.logging.level = level.to_string();
            assert_eq!(config.validate().is_ok(), ok, "level {}", level);
        }
    }
}
