//! qBittorrent torrent client implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::TorrentClientConfig;

use super::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentStats,
};

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    client: Client,
    config: TorrentClientConfig,
    /// Session ID cookie (refreshed on auth failure).
    session: Arc<RwLock<Option<String>>>,
}

impl QBittorrentClient {
    /// Create a new qBittorrent client.
    pub fn new(config: TorrentClientConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .cookie_store(true)
            .build()
            .map_err(|e| TorrentClientError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Login and store session cookie.
    async fn login(&self) -> Result<(), TorrentClientError> {
        let url = format!("{}/api/v2/auth/login", self.base_url());

        let params = [
            ("username", self.config.username.as_str()),
            ("password", self.config.password.as_str()),
        ];

        let response = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(TorrentClientError::from_reqwest)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if body.contains("Ok.") {
            debug!("qBittorrent login successful");
            // Session cookie is stored by the cookie jar
            let mut session = self.session.write().await;
            *session = Some("authenticated".to_string());
            Ok(())
        } else if body.contains("Fails.") || status.as_u16() == 403 {
            Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ))
        } else {
            Err(TorrentClientError::AuthenticationFailed(format!(
                "Unexpected response: {}",
                body.chars().take(100).collect::<String>()
            )))
        }
    }

    /// Ensure we have a valid session, logging in if needed.
    async fn ensure_authenticated(&self) -> Result<(), TorrentClientError> {
        let session = self.session.read().await;
        if session.is_some() {
            return Ok(());
        }
        drop(session);
        self.login().await
    }

    /// Send an authenticated request, logging in again once on a 403.
    ///
    /// `build` is called per attempt since request builders are single-use.
    async fn send<F>(&self, build: F) -> Result<String, TorrentClientError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.ensure_authenticated().await?;

        let mut response = build(&self.client)
            .send()
            .await
            .map_err(TorrentClientError::from_reqwest)?;

        if response.status().as_u16() == 403 {
            // Session expired, retry after login
            warn!("qBittorrent session expired, re-authenticating");
            {
                let mut session = self.session.write().await;
                *session = None;
            }
            self.login().await?;

            response = build(&self.client)
                .send()
                .await
                .map_err(TorrentClientError::from_reqwest)?;
        }

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(TorrentClientError::TorrentNotFound(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| TorrentClientError::ApiError(e.to_string()))
    }

    /// Make an authenticated GET request.
    async fn get(&self, endpoint: &str) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.get(&url)).await
    }

    /// Make an authenticated POST request with form data.
    async fn post_form(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<String, TorrentClientError> {
        let url = format!("{}{}", self.base_url(), endpoint);
        self.send(|client| client.post(&url).form(params)).await
    }

    /// Fetch `torrents/info` for the given hashes.
    async fn info(&self, hashes: &[String]) -> Result<Vec<QBTorrentInfo>, TorrentClientError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let joined = hashes
            .iter()
            .map(|h| h.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");
        let endpoint = format!("/api/v2/torrents/info?hashes={}", urlencoding::encode(&joined));
        let response = self.get(&endpoint).await?;
        parse_json(&response)
    }

    async fn trackers(&self, hash: &str) -> Result<Vec<QBTracker>, TorrentClientError> {
        let endpoint = format!("/api/v2/torrents/trackers?hash={}", hash.to_lowercase());
        let response = self.get(&endpoint).await?;
        parse_json(&response)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, TorrentClientError> {
    serde_json::from_str(body)
        .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse response: {}", e)))
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    name: String,
    state: String,
    progress: f64,
    ratio: f64,
    save_path: String,
}

impl QBTorrentInfo {
    /// Whether qBittorrent is still fetching metadata for this torrent.
    fn awaiting_metadata(&self) -> bool {
        matches!(self.state.as_str(), "metaDL" | "forcedMetaDL")
    }

    fn into_stats(self, tracker_seeders: Vec<i64>) -> TorrentStats {
        let ready = !self.awaiting_metadata();
        TorrentStats {
            name: ready.then(|| self.name),
            download_dir: if self.save_path.is_empty() {
                None
            } else {
                Some(PathBuf::from(self.save_path))
            },
            percent_done: ready.then_some(self.progress),
            tracker_seeders,
            upload_ratio: self.ratio,
        }
    }
}

/// Entry of `torrents/trackers`.
#[derive(Debug, Deserialize)]
struct QBTracker {
    url: String,
    num_seeds: i64,
}

impl QBTracker {
    /// DHT, PeX and LSD are listed as pseudo-trackers like `** [DHT] **`.
    fn is_pseudo(&self) -> bool {
        self.url.starts_with("**")
    }
}

/// Entry of `torrents/files`; `name` includes the torrent's top directory.
#[derive(Debug, Deserialize)]
struct QBFile {
    name: String,
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn name(&self) -> &str {
        "qbittorrent"
    }

    async fn add(&self, request: AddTorrentRequest) -> Result<AddTorrentResult, TorrentClientError> {
        let mut form = if request.is_remote() {
            multipart::Form::new().text("urls", request.source.clone())
        } else {
            let data = tokio::fs::read(&request.source).await.map_err(|e| {
                TorrentClientError::InvalidTorrent(format!("{}: {}", request.source, e))
            })?;
            let filename = Path::new(&request.source)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "torrent.torrent".to_string());
            let file_part = multipart::Part::bytes(data)
                .file_name(filename)
                .mime_str("application/x-bittorrent")
                .map_err(|e| TorrentClientError::InvalidTorrent(e.to_string()))?;
            multipart::Form::new().part("torrents", file_part)
        };

        form = form.text("savepath", request.location.to_string_lossy().into_owned());
        if !request.started {
            form = form.text("paused", "true").text("stopped", "true");
        }

        let url = format!("{}/api/v2/torrents/add", self.base_url());
        // Multipart forms cannot be cloned, so no re-login replay here.
        self.ensure_authenticated().await?;
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(TorrentClientError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("Fails.") {
            return Err(TorrentClientError::InvalidTorrent(request.source));
        }

        let hash = extract_hash_from_magnet(&request.source).or(Some(request.hash));
        Ok(AddTorrentResult { hash, name: None })
    }

    async fn remove(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let joined = hashes
            .iter()
            .map(|h| h.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");
        self.post_form(
            "/api/v2/torrents/delete",
            &[("hashes", &joined), ("deleteFiles", "false")],
        )
        .await?;
        Ok(())
    }

    async fn move_to(&self, hash: &str, location: &Path) -> Result<(), TorrentClientError> {
        let hash_lower = hash.to_lowercase();
        let location = location.to_string_lossy().into_owned();
        self.post_form(
            "/api/v2/torrents/setLocation",
            &[("hashes", &hash_lower), ("location", &location)],
        )
        .await?;
        Ok(())
    }

    async fn set_source(&self, _hash: &str, _source: &str) -> Result<(), TorrentClientError> {
        Err(TorrentClientError::Unsupported {
            backend: self.name().to_string(),
            operation: "set_source",
        })
    }

    async fn set_status(&self, hash: &str, started: bool) -> Result<(), TorrentClientError> {
        let hash_lower = hash.to_lowercase();
        let endpoint = if started {
            "/api/v2/torrents/resume"
        } else {
            "/api/v2/torrents/pause"
        };
        self.post_form(endpoint, &[("hashes", &hash_lower)]).await?;
        Ok(())
    }

    async fn resolve_names(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, String>, TorrentClientError> {
        let torrents = self.info(hashes).await?;
        Ok(torrents
            .into_iter()
            .filter(|t| !t.awaiting_metadata())
            .map(|t| (t.hash.to_lowercase(), t.name))
            .collect())
    }

    async fn list_files(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<PathBuf>>, TorrentClientError> {
        let mut out = HashMap::new();
        for torrent in self.info(hashes).await? {
            if torrent.awaiting_metadata() {
                continue;
            }
            let hash = torrent.hash.to_lowercase();
            let endpoint = format!("/api/v2/torrents/files?hash={}", hash);
            let files: Vec<QBFile> = parse_json(&self.get(&endpoint).await?)?;
            out.insert(hash, files.into_iter().map(|f| PathBuf::from(f.name)).collect());
        }
        Ok(out)
    }

    async fn stats(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, TorrentStats>, TorrentClientError> {
        let mut out = HashMap::new();
        for torrent in self.info(hashes).await? {
            let hash = torrent.hash.to_lowercase();
            let seeders = self
                .trackers(&hash)
                .await?
                .into_iter()
                .filter(|t| !t.is_pseudo())
                .map(|t| t.num_seeds)
                .collect();
            out.insert(hash, torrent.into_stats(seeders));
        }
        Ok(out)
    }
}

/// Extract info hash from a magnet URI.
fn extract_hash_from_magnet(magnet: &str) -> Option<String> {
    // Look for xt=urn:btih:HASH
    let parts: Vec<&str> = magnet.split('?').collect();
    if parts.len() < 2 {
        return None;
    }

    for param in parts[1].split('&') {
        if let Some(value) = param.strip_prefix("xt=urn:btih:") {
            return Some(value.to_lowercase());
        }
    }
    None
}
