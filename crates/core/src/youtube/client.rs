//! YouTube Data API v3 client.
//!
//! Uses `playlists.list` and `playlistItems.list`. Every call costs one
//! quota unit.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::{PlaylistItemsResponse, PlaylistsResponse};
use super::{PlaylistId, PlaylistInfo, PlaylistPage, PlaylistSource, SourceError};
use crate::config::YoutubeConfig;

/// Error reasons that mean the API key has no quota left today.
const QUOTA_REASONS: [&str; 2] = ["quotaExceeded", "dailyLimitExceeded"];

/// YouTube API client.
pub struct YoutubeClient {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl YoutubeClient {
    /// Create a new client.
    pub fn new(config: &YoutubeConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
        })
    }
}

#[async_trait]
impl PlaylistSource for YoutubeClient {
    async fn fetch_page(
        &self,
        playlist_id: &PlaylistId,
        cursor: Option<&str>,
    ) -> Result<PlaylistPage, SourceError> {
        let url = format!("{}/playlistItems", self.base_url);

        debug!(playlist_id = %playlist_id, cursor = ?cursor, "Fetching playlist page");

        let mut request = self.client.get(&url).query(&[
            ("part", "snippet"),
            ("playlistId", playlist_id.as_str()),
            ("maxResults", &self.page_size.to_string()),
            ("key", &self.api_key),
        ]);
        if let Some(token) = cursor {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, playlist_id));
        }

        let parsed: PlaylistItemsResponse = response.json().await.map_err(|e| {
            SourceError::ParseError(format!("Failed to parse playlistItems response: {}", e))
        })?;

        Ok(parsed.into_page())
    }

    async fn fetch_info(&self, playlist_id: &PlaylistId) -> Result<PlaylistInfo, SourceError> {
        let url = format!("{}/playlists", self.base_url);

        debug!(playlist_id = %playlist_id, "Fetching playlist metadata");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet,status"),
                ("id", playlist_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, playlist_id));
        }

        let parsed: PlaylistsResponse = response.json().await.map_err(|e| {
            SourceError::ParseError(format!("Failed to parse playlists response: {}", e))
        })?;

        parsed.into_info(playlist_id.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

fn classify_error(status: StatusCode, body: &str, playlist_id: &PlaylistId) -> SourceError {
    let detail = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());
    let quota_exhausted = detail
        .as_ref()
        .map(|d| {
            d.errors
                .iter()
                .any(|e| QUOTA_REASONS.contains(&e.reason.as_str()))
        })
        .unwrap_or(false);

    match status {
        StatusCode::FORBIDDEN if quota_exhausted => {
            warn!("YouTube API quota exhausted");
            SourceError::QuotaExhausted
        }
        StatusCode::FORBIDDEN => SourceError::Forbidden(playlist_id.to_string()),
        StatusCode::NOT_FOUND => SourceError::NotFound(playlist_id.to_string()),
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("YouTube API rate limit exceeded");
            SourceError::RateLimited
        }
        s if s.is_server_error() => SourceError::Server {
            status: s.as_u16(),
            message,
        },
        s => SourceError::ApiError {
            status: s.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::youtube::extract_playlist_id;

    fn id() -> PlaylistId {
        extract_playlist_id("PLabcdef1234567890").unwrap()
    }

    #[test]
    fn test_quota_error_detected() {
        let body = r#"{
            "error": {
                "code": 403,
                "message": "The request cannot be completed because you have exceeded your quota.",
                "errors": [{ "reason": "quotaExceeded", "domain": "youtube.quota" }]
            }
        }"#;
        assert_eq!(
            classify_error(StatusCode::FORBIDDEN, body, &id()),
            SourceError::QuotaExhausted
        );
    }

    #[test]
    fn test_plain_forbidden() {
        let body = r#"{ "error": { "code": 403, "message": "private", "errors": [{ "reason": "playlistItemsNotAccessible" }] } }"#;
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, body, &id()),
            SourceError::Forbidden(_)
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            classify_error(StatusCode::NOT_FOUND, "", &id()),
            SourceError::NotFound(_)
        ));
        assert_eq!(
            classify_error(StatusCode::TOO_MANY_REQUESTS, "", &id()),
            SourceError::RateLimited
        );
        assert!(matches!(
            classify_error(StatusCode::BAD_GATEWAY, "upstream down", &id()),
            SourceError::Server { status: 502, .. }
        ));
        assert!(matches!(
            classify_error(StatusCode::BAD_REQUEST, "bad", &id()),
            SourceError::ApiError { status: 400, .. }
        ));
    }
}
