use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Path of the YAML declaration to reconcile.
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Directory holding the applied-state cache.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Move removed data to the trash directory instead of deleting it.
    #[serde(default = "default_true")]
    pub trash: bool,
    /// Plan only; touch neither the client, the filesystem, nor the cache.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub torrent_client: TorrentClientConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: None,
            cache_dir: None,
            trash: true,
            dry_run: false,
            torrent_client: TorrentClientConfig::default(),
            reconcile: ReconcileConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// File logs are mirrored into: the configured one, else `log` under
    /// the cache directory.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.logging
            .file
            .clone()
            .or_else(|| self.cache_dir.as_ref().map(|dir| dir.join("log")))
    }
}

fn default_true() -> bool {
    true
}

/// Available torrent client backends
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientBackend {
    #[default]
    Transmission,
    Qbittorrent,
}

impl ClientBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientBackend::Transmission => "transmission",
            ClientBackend::Qbittorrent => "qbittorrent",
        }
    }
}

/// Torrent client connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorrentClientConfig {
    #[serde(default)]
    pub backend: ClientBackend,
    /// Base URL, e.g. "http://localhost:9091" for Transmission or
    /// "http://localhost:8080" for qBittorrent.
    #[serde(default = "default_client_url")]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for TorrentClientConfig {
    fn default() -> Self {
        Self {
            backend: ClientBackend::default(),
            url: default_client_url(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_client_url() -> String {
    "http://localhost:9091".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// Knobs for applying actions
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// How many times to poll for a torrent's metadata before giving up.
    #[serde(default = "default_metadata_retries")]
    pub metadata_retries: u32,
    #[serde(default = "default_metadata_retry_delay_ms")]
    pub metadata_retry_delay_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            metadata_retries: default_metadata_retries(),
            metadata_retry_delay_ms: default_metadata_retry_delay_ms(),
        }
    }
}

fn default_metadata_retries() -> u32 {
    10
}

fn default_metadata_retry_delay_ms() -> u64 {
    1000
}

/// Watch mode polling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// Logging output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// File to mirror logs into; see [`Config::log_file`] for the default.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Sanitized config for display (password redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub trash: bool,
    pub dry_run: bool,
    pub torrent_client: SanitizedTorrentClientConfig,
    pub reconcile: ReconcileConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTorrentClientConfig {
    pub backend: String,
    pub url: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let client = &config.torrent_client;
        Self {
            database: config.database.clone(),
            cache_dir: config.cache_dir.clone(),
            trash: config.trash,
            dry_run: config.dry_run,
            torrent_client: SanitizedTorrentClientConfig {
                backend: client.backend.as_str().to_string(),
                url: client.url.clone(),
                username: client.username.clone(),
                password_configured: !client.password.is_empty(),
                timeout_secs: client.timeout_secs,
            },
            reconcile: config.reconcile.clone(),
            watch: config.watch.clone(),
            logging: config.logging.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.database.is_none());
        assert!(config.trash);
        assert!(!config.dry_run);
        assert_eq!(config.torrent_client.backend, ClientBackend::Transmission);
        assert_eq!(config.torrent_client.timeout_secs, 30);
        assert_eq!(config.reconcile.metadata_retries, 10);
        assert_eq!(config.reconcile.metadata_retry_delay_ms, 1000);
        assert_eq!(config.watch.poll_interval_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
database = "/srv/anime/db.yaml"
cache_dir = "/var/cache/animanager"
trash = false

[torrent_client]
backend = "qbittorrent"
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"

[reconcile]
metadata_retries = 3

[logging]
level = "debug"
file = "/var/log/animanager.log"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database, Some(PathBuf::from("/srv/anime/db.yaml")));
        assert!(!config.trash);
        assert_eq!(config.torrent_client.backend, ClientBackend::Qbittorrent);
        assert_eq!(config.torrent_client.username, "admin");
        assert_eq!(config.reconcile.metadata_retries, 3);
        assert_eq!(config.reconcile.metadata_retry_delay_ms, 1000); // default
        assert_eq!(
            config.logging.file,
            Some(PathBuf::from("/var/log/animanager.log"))
        );
    }

    #[test]
    fn test_log_file_defaults_under_cache_dir() {
        let mut config = Config::default();
        assert_eq!(config.log_file(), None);

        config.cache_dir = Some(PathBuf::from("/var/cache/animanager"));
        assert_eq!(
            config.log_file(),
            Some(PathBuf::from("/var/cache/animanager/log"))
        );

        config.logging.file = Some(PathBuf::from("/var/log/animanager.log"));
        assert_eq!(
            config.log_file(),
            Some(PathBuf::from("/var/log/animanager.log"))
        );
    }

    #[test]
    fn test_unknown_backend_fails() {
        let toml = r#"
[torrent_client]
backend = "deluge"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_password() {
        let mut config = Config::default();
        config.torrent_client.password = "secret".to_string();

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.torrent_client.backend, "transmission");
        assert!(sanitized.torrent_client.password_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}
