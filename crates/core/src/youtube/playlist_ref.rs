//! Playlist reference parsing.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static PLAYLIST_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.|m\.)?youtube\.com/(?:playlist|watch)/?\?([^#]*)")
        .expect("valid playlist url regex")
});

static PLAYLIST_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:PL|UU|FL|OL|RD)?[A-Za-z0-9_-]{10,}$").expect("valid playlist id regex")
});

/// A validated upstream playlist identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistId(String);

impl PlaylistId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract a playlist id from a YouTube URL or accept a bare id.
///
/// Supported forms:
/// - `https://www.youtube.com/playlist?list=PLxxxxxxxx`
/// - `https://m.youtube.com/watch?v=abc&list=PLxxxxxxxx`
/// - `PLxxxxxxxx`
pub fn extract_playlist_id(input: &str) -> Option<PlaylistId> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Some(caps) = PLAYLIST_URL.captures(input) {
        let query = caps.get(1)?.as_str();
        return query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(name, _)| *name == "list")
            .map(|(_, value)| value)
            .filter(|value| PLAYLIST_ID.is_match(value))
            .map(|value| PlaylistId(value.to_string()));
    }

    if PLAYLIST_ID.is_match(input) {
        return Some(PlaylistId(input.to_string()));
    }

    None
}
