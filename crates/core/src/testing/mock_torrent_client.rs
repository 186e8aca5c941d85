//! Mock torrent client for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::torrent_client::{
    AddTorrentRequest, AddTorrentResult, TorrentClient, TorrentClientError, TorrentStats,
};

/// A torrent held by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockTorrent {
    pub source: String,
    pub location: PathBuf,
    pub started: bool,
}

/// Internal state of the mock.
#[derive(Debug, Default)]
struct MockState {
    torrents: HashMap<String, MockTorrent>,
    /// Top-level names, known once metadata has "arrived".
    names: HashMap<String, String>,
    files: HashMap<String, Vec<PathBuf>>,
    /// Remaining metadata polls before a torrent's name is revealed.
    metadata_delay: HashMap<String, u32>,
    percent_done: HashMap<String, f64>,
    seeders: HashMap<String, Vec<i64>>,
    ratios: HashMap<String, f64>,
    added: Vec<AddTorrentRequest>,
    removed: Vec<String>,
    calls: Vec<String>,
    next_error: Option<TorrentClientError>,
    refuse_set_source: bool,
}

impl MockState {
    fn take_error(&mut self) -> Result<(), TorrentClientError> {
        match self.next_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn metadata_ready(&self, hash: &str) -> bool {
        self.metadata_delay.get(hash).copied().unwrap_or(0) == 0 && self.names.contains_key(hash)
    }

    /// Counts one metadata poll against the torrent's delay.
    fn poll(&mut self, hash: &str) {
        if let Some(remaining) = self.metadata_delay.get_mut(hash) {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// Mock implementation of the TorrentClient trait.
///
/// Provides controllable behavior for testing:
/// - Track calls for assertions
/// - Control names, file lists and liveness stats
/// - Delay metadata for a number of polls
/// - Simulate failures
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new();
/// client.set_name("abc123", "[Group] Show").await;
/// client.delay_metadata("abc123", 2).await;
///
/// // The reconciler polls twice before the name shows up.
/// let names = client.resolve_names(&["abc123".into()]).await?;
/// assert!(names.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockTorrentClient {
    state: Arc<RwLock<MockState>>,
}

impl MockTorrentClient {
    /// Create a new mock torrent client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a torrent as if it had been added in an earlier run.
    pub async fn insert_torrent(&self, hash: &str, torrent: MockTorrent) {
        self.state
            .write()
            .await
            .torrents
            .insert(hash.to_string(), torrent);
    }

    /// Set the top-level name reported once metadata is available.
    pub async fn set_name(&self, hash: &str, name: &str) {
        self.state
            .write()
            .await
            .names
            .insert(hash.to_string(), name.to_string());
    }

    /// Set the file list (paths include the top-level name).
    pub async fn set_files(&self, hash: &str, files: &[&str]) {
        self.state
            .write()
            .await
            .files
            .insert(hash.to_string(), files.iter().map(PathBuf::from).collect());
    }

    /// Hide metadata for the next `polls` name or file lookups.
    pub async fn delay_metadata(&self, hash: &str, polls: u32) {
        self.state
            .write()
            .await
            .metadata_delay
            .insert(hash.to_string(), polls);
    }

    /// Set the liveness numbers reported by `stats`.
    pub async fn set_liveness(&self, hash: &str, percent_done: f64, seeders: &[i64], ratio: f64) {
        let mut state = self.state.write().await;
        state.percent_done.insert(hash.to_string(), percent_done);
        state.seeders.insert(hash.to_string(), seeders.to_vec());
        state.ratios.insert(hash.to_string(), ratio);
    }

    /// Configure the next operation to fail with the given error.
    pub async fn fail_next(&self, error: TorrentClientError) {
        self.state.write().await.next_error = Some(error);
    }

    /// Make `set_source` answer `Unsupported`, like real backends do.
    pub async fn refuse_set_source(&self, refuse: bool) {
        self.state.write().await.refuse_set_source = refuse;
    }

    /// Requests passed to `add`, in order.
    pub async fn added(&self) -> Vec<AddTorrentRequest> {
        self.state.read().await.added.clone()
    }

    /// Hashes passed to `remove`, in order.
    pub async fn removed(&self) -> Vec<String> {
        self.state.read().await.removed.clone()
    }

    /// Every mutating call as a short description, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    pub async fn torrent(&self, hash: &str) -> Option<MockTorrent> {
        self.state.read().await.torrents.get(hash).cloned()
    }

    pub async fn torrent_count(&self) -> usize {
        self.state.read().await.torrents.len()
    }
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn add(&self, request: AddTorrentRequest) -> Result<AddTorrentResult, TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        state.calls.push(format!("add {}", request.hash));
        state.added.push(request.clone());
        state.torrents.insert(
            request.hash.clone(),
            MockTorrent {
                source: request.source.clone(),
                location: request.location.clone(),
                started: request.started,
            },
        );

        let name = state
            .metadata_ready(&request.hash)
            .then(|| state.names.get(&request.hash).cloned())
            .flatten();
        Ok(AddTorrentResult {
            hash: Some(request.hash),
            name,
        })
    }

    async fn remove(&self, hashes: &[String]) -> Result<(), TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        for hash in hashes {
            state.calls.push(format!("remove {}", hash));
            state.removed.push(hash.clone());
            state.torrents.remove(hash);
        }
        Ok(())
    }

    async fn move_to(&self, hash: &str, location: &Path) -> Result<(), TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        state
            .calls
            .push(format!("move {} {}", hash, location.display()));
        match state.torrents.get_mut(hash) {
            Some(torrent) => {
                torrent.location = location.to_path_buf();
                Ok(())
            }
            None => Err(TorrentClientError::TorrentNotFound(hash.to_string())),
        }
    }

    async fn set_source(&self, hash: &str, source: &str) -> Result<(), TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        if state.refuse_set_source {
            return Err(TorrentClientError::Unsupported {
                backend: "mock".to_string(),
                operation: "set_source",
            });
        }
        state.calls.push(format!("source {} {}", hash, source));
        match state.torrents.get_mut(hash) {
            Some(torrent) => {
                torrent.source = source.to_string();
                Ok(())
            }
            None => Err(TorrentClientError::TorrentNotFound(hash.to_string())),
        }
    }

    async fn set_status(&self, hash: &str, started: bool) -> Result<(), TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        let verb = if started { "start" } else { "stop" };
        state.calls.push(format!("{} {}", verb, hash));
        match state.torrents.get_mut(hash) {
            Some(torrent) => {
                torrent.started = started;
                Ok(())
            }
            None => Err(TorrentClientError::TorrentNotFound(hash.to_string())),
        }
    }

    async fn resolve_names(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, String>, TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        let mut out = HashMap::new();
        for hash in hashes {
            if !state.torrents.contains_key(hash) {
                continue;
            }
            let ready = state.metadata_ready(hash);
            state.poll(hash);
            if let (true, Some(name)) = (ready, state.names.get(hash)) {
                out.insert(hash.clone(), name.clone());
            }
        }
        Ok(out)
    }

    async fn list_files(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<PathBuf>>, TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        let mut out = HashMap::new();
        for hash in hashes {
            if !state.torrents.contains_key(hash) {
                continue;
            }
            let ready = state.metadata_ready(hash);
            state.poll(hash);
            if let (true, Some(files)) = (ready, state.files.get(hash)) {
                out.insert(hash.clone(), files.clone());
            }
        }
        Ok(out)
    }

    async fn stats(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, TorrentStats>, TorrentClientError> {
        let mut state = self.state.write().await;
        state.take_error()?;

        let mut out = HashMap::new();
        for hash in hashes {
            let Some(torrent) = state.torrents.get(hash) else {
                continue;
            };
            let ready = state.metadata_ready(hash);
            out.insert(
                hash.clone(),
                TorrentStats {
                    name: if ready { state.names.get(hash).cloned() } else { None },
                    download_dir: Some(torrent.location.clone()),
                    percent_done: if ready {
                        Some(state.percent_done.get(hash).copied().unwrap_or(0.0))
                    } else {
                        None
                    },
                    tracker_seeders: state.seeders.get(hash).cloned().unwrap_or_default(),
                    upload_ratio: state.ratios.get(hash).copied().unwrap_or(0.0),
                },
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "abc123def456";

    fn request() -> AddTorrentRequest {
        AddTorrentRequest::new(HASH, "magnet:?xt=urn:btih:abc123def456", "/downloads")
    }

    #[tokio::test]
    async fn test_add_and_stats() {
        let client = MockTorrentClient::new();
        client.set_name(HASH, "Foo").await;
        client.set_liveness(HASH, 0.5, &[3], 0.1).await;

        let result = client.add(request()).await.unwrap();
        assert_eq!(result.hash.as_deref(), Some(HASH));
        assert_eq!(result.name.as_deref(), Some("Foo"));

        let stats = client.stats(&[HASH.to_string()]).await.unwrap();
        let stats = &stats[HASH];
        assert_eq!(stats.name.as_deref(), Some("Foo"));
        assert_eq!(stats.download_dir, Some(PathBuf::from("/downloads")));
        assert_eq!(stats.percent_done, Some(0.5));
        assert_eq!(stats.tracker_seeders, vec![3]);
    }

    #[tokio::test]
    async fn test_unknown_hashes_are_absent() {
        let client = MockTorrentClient::new();
        client.set_name(HASH, "Foo").await;
        let names = client.resolve_names(&[HASH.to_string()]).await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_delayed_metadata() {
        let client = MockTorrentClient::new();
        client.set_name(HASH, "Foo").await;
        client.delay_metadata(HASH, 2).await;
        client.add(request()).await.unwrap();

        let hashes = vec![HASH.to_string()];
        assert!(client.resolve_names(&hashes).await.unwrap().is_empty());
        assert!(client.resolve_names(&hashes).await.unwrap().is_empty());
        let names = client.resolve_names(&hashes).await.unwrap();
        assert_eq!(names.get(HASH).map(String::as_str), Some("Foo"));
    }

    #[tokio::test]
    async fn test_error_injection() {
        let client = MockTorrentClient::new();
        client
            .fail_next(TorrentClientError::ConnectionFailed("test".into()))
            .await;

        assert!(client.add(request()).await.is_err());
        // Error should be consumed
        assert!(client.add(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_call_log() {
        let client = MockTorrentClient::new();
        client.add(request()).await.unwrap();
        client.set_status(HASH, false).await.unwrap();
        client
            .move_to(HASH, Path::new("/elsewhere"))
            .await
            .unwrap();
        client.remove(&[HASH.to_string()]).await.unwrap();

        assert_eq!(
            client.calls().await,
            vec![
                format!("add {}", HASH),
                format!("stop {}", HASH),
                format!("move {} /elsewhere", HASH),
                format!("remove {}", HASH),
            ]
        );
        assert_eq!(client.torrent_count().await, 0);
    }

    #[tokio::test]
    async fn test_refused_set_source() {
        let client = MockTorrentClient::new();
        client.add(request()).await.unwrap();
        client.refuse_set_source(true).await;

        let err = client.set_source(HASH, "magnet:?y").await.unwrap_err();
        assert!(matches!(err, TorrentClientError::Unsupported { .. }));
    }
}
