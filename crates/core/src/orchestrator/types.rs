//! Types for the sync orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason recorded for playlist entries the upstream marks deleted or private.
pub const UNAVAILABLE_REASON: &str = "unavailable video";

/// Reason recorded for an earlier copy of a video listed twice in a playlist.
pub const DUPLICATE_REASON: &str = "duplicate video in playlist";

/// Where an import currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    Idle,
    Fetching,
    ParsingAndMerging,
    Persisting,
    Done,
    /// Ended early; the report holds whatever was merged before the failure.
    Failed,
    Cancelled,
}

impl ImportStage {
    /// Cancellation is only accepted before merging starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ImportStage::Idle | ImportStage::Fetching)
    }
}

/// A playlist entry that did not become a combo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub video_id: String,
    pub reason: String,
}

/// Summary of one import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub category: String,
    pub starter: String,
    pub playlist_id: String,
    /// Set once the playlist metadata has been fetched.
    pub playlist_title: Option<String>,
    /// Overall playlist note stored for the starter.
    pub note: Option<String>,
    /// Items parsed and merged (created + updated + unchanged).
    pub imported: u32,
    /// Items dropped before merging, see `skipped_items`.
    pub skipped: u32,
    /// Fetch or merge failures, see `failures`.
    pub failed: u32,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub pages_fetched: u32,
    pub skipped_items: Vec<SkippedItem>,
    pub failures: Vec<String>,
    pub stage: ImportStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportReport {
    pub(crate) fn new(category: &str, starter: &str, playlist_id: &str) -> Self {
        Self {
            category: category.to_string(),
            starter: starter.to_string(),
            playlist_id: playlist_id.to_string(),
            playlist_title: None,
            note: None,
            imported: 0,
            skipped: 0,
            failed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            pages_fetched: 0,
            skipped_items: Vec::new(),
            failures: Vec::new(),
            stage: ImportStage::Idle,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn skip(&mut self, video_id: &str, reason: impl Into<String>) {
        self.skipped += 1;
        self.skipped_items.push(SkippedItem {
            video_id: video_id.to_string(),
            reason: reason.into(),
        });
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.failed += 1;
        self.failures.push(reason.into());
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let source = match &self.playlist_title {
            Some(title) => format!(" from \"{}\"", title),
            None => String::new(),
        };
        let mut line = format!(
            "{} / {}{}: {} imported ({} new, {} updated), {} skipped, {} failed",
            self.category,
            self.starter,
            source,
            self.imported,
            self.created,
            self.updated,
            self.skipped,
            self.failed
        );
        if let Some(first) = self.failures.first() {
            line.push_str(&format!(" ({})", first));
        }
        line
    }
}

/// Errors returned before an import produces a report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// Another import for the same category and starter is in flight.
    #[error("import already running for {category} / {starter}")]
    AlreadyRunning { category: String, starter: String },

    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown starter {starter} in category {category}")]
    UnknownStarter { category: String, starter: String },

    #[error("not a valid playlist link or id: {0}")]
    InvalidPlaylist(String),

    #[error("import cancelled")]
    Cancelled,

    #[error("import task failed: {0}")]
    Internal(String),
}

/// Why a cancel request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("import can no longer be cancelled (stage: {stage:?})")]
pub struct CancelRejected {
    pub stage: ImportStage,
}
