//! Playlist item types and the YouTube wire format.

use serde::{Deserialize, Serialize};

/// Titles YouTube substitutes for items that can no longer be watched.
const UNAVAILABLE_TITLES: [&str; 2] = ["Deleted video", "Private video"];

/// A playlist item as returned by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    /// External video identifier.
    pub video_id: String,
    pub title: String,
    /// Free-text description.
    pub description: String,
}

impl RawItem {
    pub fn new(video_id: &str, title: &str, description: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
        }
    }

    /// Deleted or private videos stay in playlists as placeholders.
    pub fn is_unavailable(&self) -> bool {
        UNAVAILABLE_TITLES.contains(&self.title.as_str())
    }
}

/// One page of playlist items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistPage {
    pub items: Vec<RawItem>,
    /// Continuation cursor for the next page; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Playlist-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub title: String,
    /// Free-text playlist description.
    #[serde(default)]
    pub description: String,
}

// =============================================================================
// YouTube Data API v3 response types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistItemsResponse {
    #[serde(default)]
    pub items: Vec<PlaylistItemResource>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistItemResource {
    #[serde(default)]
    pub snippet: Option<PlaylistItemSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistItemSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceId {
    #[serde(default)]
    pub video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistsResponse {
    #[serde(default)]
    pub items: Vec<PlaylistResource>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistResource {
    #[serde(default)]
    pub snippet: Option<PlaylistSnippet>,
    #[serde(default)]
    pub status: Option<PlaylistStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistSnippet {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlaylistStatus {
    #[serde(default)]
    pub privacy_status: Option<String>,
}

impl PlaylistsResponse {
    /// The single requested playlist. An empty result means the playlist
    /// does not exist or is not visible to the key.
    pub(crate) fn into_info(self, playlist_id: &str) -> Result<PlaylistInfo, super::SourceError> {
        let resource = self
            .items
            .into_iter()
            .next()
            .ok_or_else(|| super::SourceError::NotFound(playlist_id.to_string()))?;

        let private = resource
            .status
            .and_then(|s| s.privacy_status)
            .is_some_and(|s| s == "private");
        if private {
            return Err(super::SourceError::Forbidden(format!(
                "{} is private",
                playlist_id
            )));
        }

        let snippet = resource.snippet;
        Ok(PlaylistInfo {
            title: snippet
                .as_ref()
                .and_then(|s| s.title.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown Playlist".to_string()),
            description: snippet.map(|s| s.description).unwrap_or_default(),
        })
    }
}

impl PlaylistItemsResponse {
    /// Convert to a page, dropping entries without a video id.
    pub(crate) fn into_page(self) -> PlaylistPage {
        let items = self
            .items
            .into_iter()
            .filter_map(|item| {
                let snippet = item.snippet?;
                let video_id = snippet.resource_id.and_then(|r| r.video_id)?;
                if video_id.is_empty() {
                    return None;
                }
                Some(RawItem {
                    video_id,
                    title: snippet.title,
                    description: snippet.description,
                })
            })
            .collect();

        PlaylistPage {
            items,
            next_cursor: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_into_page() {
        let json = r#"{
            "kind": "youtube#playlistItemListResponse",
            "nextPageToken": "CAUQAA",
            "items": [
                {
                    "snippet": {
                        "title": "BnB 5A",
                        "description": "Notation: 5A > 5B > 2C",
                        "resourceId": { "kind": "youtube#video", "videoId": "vid1" }
                    }
                },
                {
                    "snippet": {
                        "title": "No id",
                        "description": "",
                        "resourceId": { "kind": "youtube#video" }
                    }
                },
                { "id": "no-snippet" }
            ]
        }"#;

        let response: PlaylistItemsResponse = serde_json::from_str(json).unwrap();
        let page = response.into_page();

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].video_id, "vid1");
        assert_eq!(page.items[0].description, "Notation: 5A > 5B > 2C");
        assert_eq!(page.next_cursor.as_deref(), Some("CAUQAA"));
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let json = r#"{ "items": [], "nextPageToken": "" }"#;
        let response: PlaylistItemsResponse = serde_json::from_str(json).unwrap();
        let page = response.into_page();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_playlists_response_into_info() {
        let json = r#"{
            "items": [{
                "snippet": { "title": "Ky 5A routes", "description": "Note: meterless\nmore" },
                "status": { "privacyStatus": "unlisted" }
            }]
        }"#;
        let response: PlaylistsResponse = serde_json::from_str(json).unwrap();
        let info = response.into_info("PLabc").unwrap();
        assert_eq!(info.title, "Ky 5A routes");
        assert_eq!(info.description, "Note: meterless\nmore");
    }

    #[test]
    fn test_missing_or_private_playlist() {
        let empty: PlaylistsResponse = serde_json::from_str(r#"{ "items": [] }"#).unwrap();
        assert!(matches!(
            empty.into_info("PLabc"),
            Err(crate::youtube::SourceError::NotFound(_))
        ));

        let private: PlaylistsResponse = serde_json::from_str(
            r#"{ "items": [{ "snippet": { "title": "x" }, "status": { "privacyStatus": "private" } }] }"#,
        )
        .unwrap();
        assert!(matches!(
            private.into_info("PLabc"),
            Err(crate::youtube::SourceError::Forbidden(_))
        ));

        let untitled: PlaylistsResponse =
            serde_json::from_str(r#"{ "items": [{ "snippet": {} }] }"#).unwrap();
        assert_eq!(untitled.into_info("PLabc").unwrap().title, "Unknown Playlist");
    }

    #[test]
    fn test_unavailable_items() {
        assert!(RawItem::new("a", "Deleted video", "").is_unavailable());
        assert!(RawItem::new("b", "Private video", "").is_unavailable());
        assert!(!RawItem::new("c", "Corner BnB", "").is_unavailable());
    }
}
