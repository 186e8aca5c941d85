//! Transmission torrent client implementation (JSON RPC).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::TorrentClientConfig;

use super::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentStats,
};

/// Header carrying Transmission's CSRF token.
const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// Fields requested from `torrent-get`.
const TORRENT_FIELDS: &[&str] = &[
    "hashString",
    "name",
    "downloadDir",
    "percentDone",
    "uploadRatio",
    "metadataPercentComplete",
    "trackerStats",
    "files",
];

/// Transmission client implementation.
pub struct TransmissionClient {
    client: Client,
    config: TorrentClientConfig,
    /// Session token, refreshed whenever the daemon answers 409.
    session_id: Arc<RwLock<Option<String>>>,
}

impl TransmissionClient {
    /// Create a new Transmission client.
    pub fn new(config: TorrentClientConfig) -> Result<Self, TorrentClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| TorrentClientError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            config,
            session_id: Arc::new(RwLock::new(None)),
        })
    }

    /// RPC endpoint; a bare host URL gets the default path appended.
    fn rpc_url(&self) -> String {
        let base = self.config.url.trim_end_matches('/');
        if base.ends_with("/rpc") {
            base.to_string()
        } else {
            format!("{}/transmission/rpc", base)
        }
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, TorrentClientError> {
        let mut request = self.client.post(self.rpc_url()).json(body);
        if !self.config.username.is_empty() {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }
        if let Some(id) = self.session_id.read().await.as_ref() {
            request = request.header(SESSION_HEADER, id);
        }
        request.send().await.map_err(TorrentClientError::from_reqwest)
    }

    /// Call an RPC method, negotiating the session token once if needed.
    async fn call(&self, method: &str, arguments: Value) -> Result<Value, TorrentClientError> {
        let body = json!({ "method": method, "arguments": arguments });

        let mut response = self.post(&body).await?;
        if response.status() == StatusCode::CONFLICT {
            let id = response
                .headers()
                .get(SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    TorrentClientError::ApiError("409 without a session id".to_string())
                })?;
            debug!("Transmission session id refreshed");
            *self.session_id.write().await = Some(id);
            response = self.post(&body).await?;
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TorrentClientError::AuthenticationFailed(
                "Invalid credentials".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(TorrentClientError::ApiError(format!("HTTP {}", status)));
        }

        let reply: RpcResponse = response
            .json()
            .await
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse response: {}", e)))?;
        reply.into_arguments(method)
    }

    async fn get_torrents(
        &self,
        hashes: &[String],
    ) -> Result<Vec<TrTorrent>, TorrentClientError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let arguments = self
            .call(
                "torrent-get",
                json!({ "ids": hashes, "fields": TORRENT_FIELDS }),
            )
            .await?;
        let list: TrTorrentList = serde_json::from_value(arguments)
            .map_err(|e| TorrentClientError::ApiError(format!("Failed to parse torrents: {}", e)))?;
        Ok(list.torrents)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: String,
    #[serde(default)]
    arguments: Value,
}

impl RpcResponse {
    fn into_arguments(self, method: &str) -> Result<Value, TorrentClientError> {
        if self.result == "success" {
            Ok(self.arguments)
        } else {
            Err(TorrentClientError::ApiError(format!(
                "{} failed: {}",
                method, self.result
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TrTorrentList {
    #[serde(default)]
    torrents: Vec<TrTorrent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrTorrent {
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    download_dir: String,
    #[serde(default)]
    percent_done: f64,
    #[serde(default)]
    upload_ratio: f64,
    #[serde(default)]
    metadata_percent_complete: f64,
    #[serde(default)]
    tracker_stats: Vec<TrTrackerStat>,
    #[serde(default)]
    files: Vec<TrFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrTrackerStat {
    seeder_count: i64,
}

#[derive(Debug, Deserialize)]
struct TrFile {
    name: String,
}

/// Entry of `torrent-added` / `torrent-duplicate`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrAdded {
    hash_string: String,
    name: Option<String>,
}

impl TrTorrent {
    fn metadata_ready(&self) -> bool {
        self.metadata_percent_complete >= 1.0
    }

    fn into_stats(self) -> TorrentStats {
        let ready = self.metadata_ready();
        TorrentStats {
            name: ready.then(|| self.name),
            download_dir: if self.download_dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(self.download_dir))
            },
            percent_done: ready.then_some(self.percent_done),
            tracker_seeders: self.tracker_stats.iter().map(|t| t.seeder_count).collect(),
            // -1 means no ratio yet
            upload_ratio: self.upload_ratio.max(0.0),
        }
    }
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn name(&self) -> &str {
        "transmission"
    }

    async fn add(&self, request: AddTorrentRequest) -> Result<AddTorrentResult, TorrentClientError> {
        // Transmission resolves `filename` itself: magnets, URLs, and paths
        // on the daemon's host all go through the same field.
        let arguments = self
            .call(
                "torrent-add",
                json!({
                    "filename": request.source,
                    "download-dir": request.location.to_string_lossy(),
                    "paused": !request.started,
                }),
            )
            .await?;

        let added = arguments
            .get("torrent-added")
            .or_else(|| arguments.get("torrent-duplicate"))
            .cloned()
            .ok_or_else(|| {
                TorrentClientError::InvalidTorrent(format!("{} was not added", request.source))
            })?;
        let added: TrAdded = serde_json::from_value(added)
            .map_err(|e| TorrentClientError::ApiError(e.to_string()))?;

        Ok(AddTorrentResult {
            hash: Some(added.hash_string.to_lowercase()),
            name: added.name,
        })
    }

    async fn remove(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        if hashes.is_empty() {
            return Ok(());
        }
        self.call(
            "torrent-remove",
            json!({ "ids": hashes, "delete-local-data": false }),
        )
        .await?;
        Ok(())
    }

    async fn move_to(&self, hash: &str, location: &Path) -> Result<(), TorrentClientError> {
        self.call(
            "torrent-set-location",
            json!({ "ids": [hash], "location": location.to_string_lossy(), "move": true }),
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
        let method = if started { "torrent-start" } else { "torrent-stop" };
        self.call(method, json!({ "ids": [hash] })).await?;
        Ok(())
    }

    async fn resolve_names(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, String>, TorrentClientError> {
        Ok(self
            .get_torrents(hashes)
            .await?
            .into_iter()
            .filter(|t| t.metadata_ready())
            .map(|t| (t.hash_string.to_lowercase(), t.name))
            .collect())
    }

    async fn list_files(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<PathBuf>>, TorrentClientError> {
        Ok(self
            .get_torrents(hashes)
            .await?
            .into_iter()
            .filter(|t| t.metadata_ready())
            .map(|t| {
                let files = t.files.into_iter().map(|f| PathBuf::from(f.name)).collect();
                (t.hash_string.to_lowercase(), files)
            })
            .collect())
    }

    async fn stats(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, TorrentStats>, TorrentClientError> {
        Ok(self
            .get_torrents(hashes)
            .await?
            .into_iter()
            .map(|t| (t.hash_string.to_lowercase(), t.into_stats()))
            .collect())
    }
}
