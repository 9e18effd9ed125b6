//! Mock playlist source for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};

use crate::youtube::{
    PlaylistId, PlaylistInfo, PlaylistPage, PlaylistSource, RawItem, SourceError,
};

/// A recorded page request for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPageRequest {
    pub playlist_id: String,
    pub cursor: Option<String>,
}

/// Mock implementation of the PlaylistSource trait.
///
/// Provides controllable behavior for testing:
/// - Serve scripted pages per playlist (cursors are `page-<n>`)
/// - Serve playlist metadata (defaults to `Playlist <id>`, no description)
/// - Track requests for assertions
/// - Inject one-shot or per-page failures
/// - Hold requests in flight until the test releases them
///
/// # Example
///
/// ```rust,ignore
/// use combot_core::testing::{MockPlaylistSource, fixtures};
///
/// let source = MockPlaylistSource::new();
/// source.add_playlist(&fixtures::playlist_id(), fixtures::paged_items(5, 2)).await;
///
/// let page = source.fetch_page(&fixtures::playlist_id(), None).await?;
/// assert_eq!(page.items.len(), 2);
/// ```
#[derive(Debug)]
pub struct MockPlaylistSource {
    /// Pages by playlist id.
    playlists: Arc<RwLock<HashMap<String, Vec<Vec<RawItem>>>>>,
    /// Recorded requests.
    requests: Arc<RwLock<Vec<RecordedPageRequest>>>,
    /// Errors returned by the next calls, in order.
    errors: Arc<RwLock<VecDeque<SourceError>>>,
    /// Failures returned every time a given page is requested.
    page_failures: Arc<RwLock<HashMap<(String, usize), SourceError>>>,
    /// If set, each request waits for a permit before answering.
    gate: Arc<RwLock<Option<Arc<Semaphore>>>>,
    /// Metadata by playlist id.
    infos: Arc<RwLock<HashMap<String, PlaylistInfo>>>,
    /// Failures returned every time a playlist's metadata is requested.
    info_failures: Arc<RwLock<HashMap<String, SourceError>>>,
    /// Playlist ids of recorded metadata requests.
    info_requests: Arc<RwLock<Vec<String>>>,
}

impl Default for MockPlaylistSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlaylistSource {
    /// Create a new mock source with no playlists.
    pub fn new() -> Self {
        Self {
            playlists: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(VecDeque::new())),
            page_failures: Arc::new(RwLock::new(HashMap::new())),
            gate: Arc::new(RwLock::new(None)),
            infos: Arc::new(RwLock::new(HashMap::new())),
            info_failures: Arc::new(RwLock::new(HashMap::new())),
            info_requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Set (or replace) the pages served for a playlist.
    pub async fn add_playlist(&self, playlist_id: &PlaylistId, pages: Vec<Vec<RawItem>>) {
        self.playlists
            .write()
            .await
            .insert(playlist_id.to_string(), pages);
    }

    /// Remove a playlist so it answers NotFound.
    pub async fn remove_playlist(&self, playlist_id: &PlaylistId) {
        self.playlists.write().await.remove(playlist_id.as_str());
        self.infos.write().await.remove(playlist_id.as_str());
    }

    /// Set the metadata served for a playlist.
    pub async fn set_info(&self, playlist_id: &PlaylistId, info: PlaylistInfo) {
        self.infos
            .write()
            .await
            .insert(playlist_id.to_string(), info);
    }

    // =========================================================================
    // Request Recording
    // =========================================================================

    /// Get all recorded requests.
    pub async fn recorded_requests(&self) -> Vec<RecordedPageRequest> {
        self.requests.read().await.clone()
    }

    /// Get the number of requests performed.
    pub async fn call_count(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Get the number of metadata requests performed.
    ///
    /// Metadata requests are not part of [`call_count`](Self::call_count).
    pub async fn info_call_count(&self) -> usize {
        self.info_requests.read().await.len()
    }

    /// Clear recorded requests.
    pub async fn clear_recorded(&self) {
        self.requests.write().await.clear();
        self.info_requests.write().await.clear();
    }

    // =========================================================================
    // Error Injection
    // =========================================================================

    /// Queue an error for the next request, whatever it asks for.
    pub async fn push_error(&self, error: SourceError) {
        self.errors.write().await.push_back(error);
    }

    /// Fail every request for page `page` (0-based) of a playlist.
    pub async fn fail_page(&self, playlist_id: &PlaylistId, page: usize, error: SourceError) {
        self.page_failures
            .write()
            .await
            .insert((playlist_id.to_string(), page), error);
    }

    /// Fail every metadata request for a playlist.
    pub async fn fail_info(&self, playlist_id: &PlaylistId, error: SourceError) {
        self.info_failures
            .write()
            .await
            .insert(playlist_id.to_string(), error);
    }

    /// Clear queued, per-page and metadata errors.
    pub async fn clear_errors(&self) {
        self.errors.write().await.clear();
        self.page_failures.write().await.clear();
        self.info_failures.write().await.clear();
    }

    // =========================================================================
    // Flow Control
    // =========================================================================

    /// Hold every subsequent request until a permit is added to the
    /// returned semaphore. Each request consumes one permit.
    pub async fn hold_requests(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.write().await = Some(Arc::clone(&gate));
        gate
    }

    /// Stop holding requests. Requests already waiting still need permits.
    pub async fn release_requests(&self) {
        *self.gate.write().await = None;
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.read().await.clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

fn page_index(cursor: Option<&str>) -> Result<usize, SourceError> {
    match cursor {
        None => Ok(0),
        Some(token) => token
            .strip_prefix("page-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| SourceError::ApiError {
                status: 400,
                message: format!("invalid page token: {}", token),
            }),
    }
}

#[async_trait]
impl PlaylistSource for MockPlaylistSource {
    async fn fetch_page(
        &self,
        playlist_id: &PlaylistId,
        cursor: Option<&str>,
    ) -> Result<PlaylistPage, SourceError> {
        self.requests.write().await.push(RecordedPageRequest {
            playlist_id: playlist_id.to_string(),
            cursor: cursor.map(str::to_string),
        });

        self.wait_for_gate().await;

        if let Some(error) = self.errors.write().await.pop_front() {
            return Err(error);
        }

        let index = page_index(cursor)?;
        if let Some(error) = self
            .page_failures
            .read()
            .await
            .get(&(playlist_id.to_string(), index))
        {
            return Err(error.clone());
        }

        let playlists = self.playlists.read().await;
        let pages = playlists
            .get(playlist_id.as_str())
            .ok_or_else(|| SourceError::NotFound(playlist_id.to_string()))?;

        let items = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));

        Ok(PlaylistPage { items, next_cursor })
    }

    /// Answers immediately; the request gate and error queue only apply to pages.
    async fn fetch_info(&self, playlist_id: &PlaylistId) -> Result<PlaylistInfo, SourceError> {
        self.info_requests
            .write()
            .await
            .push(playlist_id.to_string());

        if let Some(error) = self.info_failures.read().await.get(playlist_id.as_str()) {
            return Err(error.clone());
        }

        if let Some(info) = self.infos.read().await.get(playlist_id.as_str()) {
            return Ok(info.clone());
        }

        if self.playlists.read().await.contains_key(playlist_id.as_str()) {
            Ok(PlaylistInfo {
                title: format!("Playlist {}", playlist_id),
                description: String::new(),
            })
        } else {
            Err(SourceError::NotFound(playlist_id.to_string()))
        }
    }
}
