//! Torrent client abstraction.
//!
//! This module provides a `TorrentClient` trait for managing torrents across
//! various backends (Transmission, qBittorrent).

mod qbittorrent;
mod transmission;
mod types;

use std::sync::Arc;

use tracing::info;

use crate::config::{ClientBackend, TorrentClientConfig};

pub use qbittorrent::QBittorrentClient;
pub use transmission::TransmissionClient;
pub use types::*;

/// Build the configured backend.
pub fn create_torrent_client(
    config: &TorrentClientConfig,
) -> Result<Arc<dyn TorrentClient>, TorrentClientError> {
    info!(
        "Using {} torrent client at {}",
        config.backend.as_str(),
        config.url
    );
    let client: Arc<dyn TorrentClient> = match config.backend {
        ClientBackend::Transmission => Arc::new(TransmissionClient::new(config.clone())?),
        ClientBackend::Qbittorrent => Arc::new(QBittorrentClient::new(config.clone())?),
    };
    Ok(client)
}
