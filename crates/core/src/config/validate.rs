use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - The declaration and cache directory are set
/// - Torrent client URL is not empty and its timeout is not 0
/// - Watch poll interval is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.database.is_none() {
        return Err(ConfigError::ValidationError(
            "database path is required".to_string(),
        ));
    }
    if config.cache_dir.is_none() {
        return Err(ConfigError::ValidationError(
            "cache_dir is required".to_string(),
        ));
    }

    // Client validation
    if config.torrent_client.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "torrent_client.url cannot be empty".to_string(),
        ));
    }
    if config.torrent_client.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "torrent_client.timeout_secs cannot be 0".to_string(),
        ));
    }

    if config.watch.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "watch.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    Ok(())
}
