//! Upstream video-catalog API.
//!
//! [`PlaylistSource`] is the seam the fetcher talks to: given a playlist and
//! an optional continuation cursor it returns one page of items, and it
//! returns the playlist's own title and description. The real
//! implementation is [`YoutubeClient`]; tests use
//! [`crate::testing::MockPlaylistSource`].

mod client;
mod playlist_ref;
mod types;

pub use client::YoutubeClient;
pub use playlist_ref::{extract_playlist_id, PlaylistId};
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a playlist source.
///
/// Cloneable so a single failed fetch can be handed to every coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network or transport failure (connect, timeout, reset).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// Upstream 5xx response.
    #[error("server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Upstream asked us to slow down (429).
    #[error("rate limited by upstream")]
    RateLimited,

    /// The API key's daily quota is spent.
    #[error("upstream quota exhausted")]
    QuotaExhausted,

    /// Playlist does not exist.
    #[error("playlist not found: {0}")]
    NotFound(String),

    /// Playlist is private or restricted.
    #[error("access forbidden: {0}")]
    Forbidden(String),

    /// Any other non-success response.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Transport(_) | SourceError::Server { .. } | SourceError::RateLimited
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SourceError::ParseError(e.to_string())
        } else {
            SourceError::Transport(e.to_string())
        }
    }
}

/// Trait for paginated playlist sources.
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// Fetch one page of playlist items.
    ///
    /// `cursor` is the continuation token returned with the previous page,
    /// or `None` for the first page.
    async fn fetch_page(
        &self,
        playlist_id: &PlaylistId,
        cursor: Option<&str>,
    ) -> Result<PlaylistPage, SourceError>;

    /// Fetch the playlist's title and description.
    async fn fetch_info(&self, playlist_id: &PlaylistId) -> Result<PlaylistInfo, SourceError>;
}
