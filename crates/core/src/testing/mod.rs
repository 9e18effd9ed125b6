//! Testing utilities and mock implementations.
//!
//! Lets the fetcher and orchestrator run end to end without network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use combot_core::testing::{fixtures, MockPlaylistSource};
//!
//! let source = MockPlaylistSource::new();
//! source.add_playlist(&fixtures::playlist_id(), fixtures::paged_items(5, 2)).await;
//! source.push_error(SourceError::Transport("reset".into())).await;
//! ```

mod mock_playlist_source;

pub use mock_playlist_source::{MockPlaylistSource, RecordedPageRequest};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::catalog::{Catalog, ComboRecord};
    use crate::youtube::{extract_playlist_id, PlaylistId, RawItem};

    /// A valid playlist id.
    pub fn playlist_id() -> PlaylistId {
        playlist("PLfixture000000000001")
    }

    /// A second valid playlist id, distinct from [`playlist_id`].
    pub fn other_playlist_id() -> PlaylistId {
        playlist("PLfixture000000000002")
    }

    /// Parse a playlist id, panicking on invalid input.
    pub fn playlist(id: &str) -> PlaylistId {
        extract_playlist_id(id).unwrap_or_else(|| panic!("invalid fixture playlist id: {}", id))
    }

    /// A playlist item with the given description.
    pub fn item(video_id: &str, description: &str) -> RawItem {
        RawItem::new(video_id, &format!("Combo {}", video_id), description)
    }

    /// `count` parseable items (`vid0`, `vid1`, ...) split into pages of `per_page`.
    pub fn paged_items(count: usize, per_page: usize) -> Vec<Vec<RawItem>> {
        let items: Vec<RawItem> = (0..count)
            .map(|i| {
                item(
                    &format!("vid{}", i),
                    &format!("Notation: 5A > 5B > 236C\nNotes: route {}", i),
                )
            })
            .collect();
        if items.is_empty() {
            return vec![Vec::new()];
        }
        items.chunks(per_page.max(1)).map(<[RawItem]>::to_vec).collect()
    }

    /// Catalog with "Midscreen" (5A, 2B) and "Corner" (2A).
    pub fn sample_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        for (category, starters) in [("Midscreen", &["5A", "2B"][..]), ("Corner", &["2A"][..])] {
            catalog
                .add_category(category)
                .unwrap_or_else(|e| panic!("fixture category: {}", e));
            for starter in starters {
                catalog
                    .add_starter(category, starter)
                    .unwrap_or_else(|e| panic!("fixture starter: {}", e));
            }
        }
        catalog
    }

    /// A combo record for `video_id` under Midscreen / 5A.
    pub fn combo(video_id: &str, notation: &str) -> ComboRecord {
        ComboRecord {
            external_video_id: video_id.to_string(),
            category: "Midscreen".to_string(),
            starter: "5A".to_string(),
            notation: notation.to_string(),
            notes: None,
            imported_at: Utc::now(),
        }
    }
}
