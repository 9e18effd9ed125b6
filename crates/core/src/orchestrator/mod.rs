//! Playlist import orchestration.
//!
//! The orchestrator turns one import request into Fetch → Parse → Merge →
//! Persist, holding a lock on the (category, starter) pair for the duration:
//! - **Fetch**: pages through [`crate::fetcher::PlaylistFetcher`]; cancellable
//! - **Parse**: each description through [`crate::parser::DescriptionParser`]
//! - **Merge**: a single [`crate::catalog::CatalogStore::mutate`] call
//! - **Persist**: debounced by the store, or flushed when configured

mod config;
mod runner;
mod types;

pub use config::ImportConfig;
pub use runner::{ImportHandle, SyncOrchestrator};
pub use types::{
    CancelRejected, ImportError, ImportReport, ImportStage, SkippedItem, DUPLICATE_REASON,
    UNAVAILABLE_REASON,
};
