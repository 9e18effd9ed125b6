//! Playlist import orchestration.
//!
//! Each import runs as its own task:
//! `Idle → Fetching → ParsingAndMerging → Persisting → Done`, or `Failed`
//! when fetching ends early. Fetching starts with the playlist metadata,
//! whose overall note is stored for the starter alongside the combos. Imports for different (category, starter) keys
//! run concurrently; a second import for a key already in flight is
//! rejected, never queued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::{fold_name, CatalogError, CatalogStore, ComboRecord, UpsertOutcome};
use crate::events::{emit_opt, EventHandle, SyncEvent};
use crate::fetcher::PlaylistFetcher;
use crate::parser::{playlist_note, DescriptionParser};
use crate::youtube::{extract_playlist_id, PlaylistId, RawItem};

use super::config::ImportConfig;
use super::types::{
    CancelRejected, ImportError, ImportReport, ImportStage, DUPLICATE_REASON, UNAVAILABLE_REASON,
};

/// Lock key: category compared case-insensitively, starter exactly.
type ImportKey = (String, String);

fn import_key(category: &str, starter: &str) -> ImportKey {
    (fold_name(category), starter.to_string())
}

/// Holds a key in the active set until dropped.
struct ImportGuard {
    key: ImportKey,
    active: Arc<Mutex<HashSet<ImportKey>>>,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
        debug!(category = %self.key.0, starter = %self.key.1, "Import lock released");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared between an import task and its handle.
struct ImportControl {
    stage: Mutex<ImportStage>,
    cancel: watch::Sender<bool>,
}

impl ImportControl {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            stage: Mutex::new(ImportStage::Idle),
            cancel,
        }
    }

    fn stage(&self) -> ImportStage {
        *lock(&self.stage)
    }

    fn set_stage(&self, stage: ImportStage) {
        *lock(&self.stage) = stage;
    }

    fn request_cancel(&self) -> Result<(), CancelRejected> {
        let stage = lock(&self.stage);
        if !stage.is_cancellable() {
            return Err(CancelRejected { stage: *stage });
        }
        self.cancel.send_replace(true);
        Ok(())
    }

    /// Move to merging unless a cancel got there first.
    fn begin_merge(&self) -> bool {
        let mut stage = lock(&self.stage);
        if *self.cancel.borrow() {
            return false;
        }
        *stage = ImportStage::ParsingAndMerging;
        true
    }
}

/// Handle to a running import.
pub struct ImportHandle {
    category: String,
    starter: String,
    control: Arc<ImportControl>,
    task: JoinHandle<Result<ImportReport, ImportError>>,
}

impl ImportHandle {
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn starter(&self) -> &str {
        &self.starter
    }

    pub fn stage(&self) -> ImportStage {
        self.control.stage()
    }

    /// Ask the import to stop. Refused once merging has started.
    ///
    /// A cancelled import performs no mutation and [`ImportHandle::wait`]
    /// returns [`ImportError::Cancelled`].
    pub fn cancel(&self) -> Result<(), CancelRejected> {
        self.control.request_cancel()
    }

    /// Wait for the import to finish.
    pub async fn wait(self) -> Result<ImportReport, ImportError> {
        self.task
            .await
            .map_err(|e| ImportError::Internal(e.to_string()))?
    }
}

/// Drives playlist imports into the catalog.
#[derive(Clone)]
pub struct SyncOrchestrator {
    store: CatalogStore,
    fetcher: PlaylistFetcher,
    parser: DescriptionParser,
    config: ImportConfig,
    events: Option<EventHandle>,
    active: Arc<Mutex<HashSet<ImportKey>>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: CatalogStore,
        fetcher: PlaylistFetcher,
        config: ImportConfig,
        events: Option<EventHandle>,
    ) -> Self {
        Self {
            store,
            fetcher,
            parser: DescriptionParser::new(),
            config,
            events,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Whether an import for this key is in flight.
    pub fn is_running(&self, category: &str, starter: &str) -> bool {
        lock(&self.active).contains(&import_key(category, starter))
    }

    /// Number of imports in flight.
    pub fn active_imports(&self) -> usize {
        lock(&self.active).len()
    }

    /// Import a playlist and wait for the report.
    pub async fn import_playlist(
        &self,
        category: &str,
        starter: &str,
        playlist_ref: &str,
    ) -> Result<ImportReport, ImportError> {
        self.start_import(category, starter, playlist_ref)?.wait().await
    }

    /// Validate the request, take the per-key lock and spawn the import.
    ///
    /// Returns immediately. Fails without side effects when the playlist
    /// reference is invalid, the category or starter does not exist, or an
    /// import for the same key is already running.
    pub fn start_import(
        &self,
        category: &str,
        starter: &str,
        playlist_ref: &str,
    ) -> Result<ImportHandle, ImportError> {
        let playlist_id = extract_playlist_id(playlist_ref)
            .ok_or_else(|| ImportError::InvalidPlaylist(playlist_ref.trim().to_string()))?;

        let category = {
            let catalog = self.store.read();
            let entry = catalog
                .category(category)
                .ok_or_else(|| ImportError::UnknownCategory(category.to_string()))?;
            if !entry.starters.iter().any(|s| s == starter) {
                return Err(ImportError::UnknownStarter {
                    category: entry.name.clone(),
                    starter: starter.to_string(),
                });
            }
            entry.name.clone()
        };

        let guard = self.try_lock(&category, starter)?;
        let control = Arc::new(ImportControl::new());

        info!(
            category = %category,
            starter = %starter,
            playlist_id = %playlist_id,
            "Starting playlist import"
        );

        let task = tokio::spawn(self.clone().run(
            guard,
            Arc::clone(&control),
            category.clone(),
            starter.to_string(),
            playlist_id,
        ));

        Ok(ImportHandle {
            category,
            starter: starter.to_string(),
            control,
            task,
        })
    }

    fn try_lock(&self, category: &str, starter: &str) -> Result<ImportGuard, ImportError> {
        let key = import_key(category, starter);
        if !lock(&self.active).insert(key.clone()) {
            warn!(category = %category, starter = %starter, "Import already running");
            if let Some(events) = &self.events {
                events.try_emit(SyncEvent::ImportRejected {
                    category: category.to_string(),
                    starter: starter.to_string(),
                });
            }
            return Err(ImportError::AlreadyRunning {
                category: category.to_string(),
                starter: starter.to_string(),
            });
        }
        Ok(ImportGuard {
            key,
            active: Arc::clone(&self.active),
        })
    }

    async fn run(
        self,
        _guard: ImportGuard,
        control: Arc<ImportControl>,
        category: String,
        starter: String,
        playlist_id: PlaylistId,
    ) -> Result<ImportReport, ImportError> {
        let mut report = ImportReport::new(&category, &starter, playlist_id.as_str());

        emit_opt(
            &self.events,
            SyncEvent::ImportStarted {
                category: category.clone(),
                starter: starter.clone(),
                playlist_id: playlist_id.to_string(),
            },
        )
        .await;

        // Fetch
        control.set_stage(ImportStage::Fetching);
        let mut cancel = control.cancel.subscribe();

        let info = tokio::select! {
            biased;
            _ = cancel.wait_for(|cancelled| *cancelled) => None,
            info = self.fetcher.fetch_info(&playlist_id) => Some(info),
        };
        let Some(info) = info else {
            return self.cancelled(&control, &category, &starter, &playlist_id).await;
        };

        let mut raw: Vec<RawItem> = Vec::new();
        match info {
            Ok(info) => {
                report.note = Some(playlist_note(&info.description));
                report.playlist_title = Some(info.title);

                let mut items = self.fetcher.fetch_items(playlist_id.clone());
                loop {
                    let step = tokio::select! {
                        biased;
                        _ = cancel.wait_for(|cancelled| *cancelled) => None,
                        next = items.next() => Some(next),
                    };
                    let Some(next) = step else {
                        return self.cancelled(&control, &category, &starter, &playlist_id).await;
                    };
                    match next {
                        Some(Ok(item)) => raw.push(item),
                        Some(Err(e)) => {
                            warn!(playlist_id = %playlist_id, "Fetch ended early: {}", e);
                            report.fail(e.to_string());
                            break;
                        }
                        None => break,
                    }
                }
                report.pages_fetched = items.pages_fetched();
                for video_id in items.unavailable() {
                    report.skip(video_id, UNAVAILABLE_REASON);
                }
            }
            Err(e) => {
                warn!(playlist_id = %playlist_id, "Playlist metadata unavailable: {}", e);
                report.fail(format!("playlist metadata: {}", e));
            }
        }

        // Parse and merge
        if !control.begin_merge() {
            return self.cancelled(&control, &category, &starter, &playlist_id).await;
        }

        let now = Utc::now();
        let mut records = Vec::with_capacity(raw.len());
        for item in raw {
            match self.parser.parse(&item.description) {
                Ok(parsed) => records.push(ComboRecord {
                    external_video_id: item.video_id,
                    category: category.clone(),
                    starter: starter.clone(),
                    notation: parsed.notation,
                    notes: parsed.notes,
                    imported_at: now,
                }),
                Err(reason) => {
                    debug!(video_id = %item.video_id, "Skipping item: {}", reason);
                    report.skip(&item.video_id, reason.to_string());
                }
            }
        }

        let (records, duplicates) = dedupe_records(records);
        for video_id in &duplicates {
            report.skip(video_id, DUPLICATE_REASON);
        }

        if !records.is_empty() || report.note.is_some() {
            let count = records.len() as u32;
            match self.merge(&category, &starter, records, report.note.as_deref()) {
                Ok((created, updated, unchanged)) => {
                    report.created = created;
                    report.updated = updated;
                    report.unchanged = unchanged;
                    report.imported = created + updated + unchanged;
                }
                Err(e) => {
                    warn!(category = %category, starter = %starter, "Merge failed: {}", e);
                    report.failed += count;
                    report.failures.push(format!("merge failed: {}", e));
                }
            }
        }

        // Persist
        control.set_stage(ImportStage::Persisting);
        if self.config.flush_on_complete && self.store.is_dirty() {
            // Failures are retried by the store and reported as events.
            if let Err(e) = self.store.flush().await {
                warn!("Flush after import failed: {}", e);
            }
        }

        report.stage = if report.failures.is_empty() {
            ImportStage::Done
        } else {
            ImportStage::Failed
        };
        report.finished_at = Some(Utc::now());
        control.set_stage(report.stage);

        info!(
            category = %category,
            starter = %starter,
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            "Import finished"
        );
        emit_opt(
            &self.events,
            SyncEvent::ImportCompleted {
                category,
                starter,
                playlist_id: playlist_id.to_string(),
                imported: report.imported,
                skipped: report.skipped,
                failed: report.failed,
            },
        )
        .await;

        Ok(report)
    }

    /// Apply all records and the starter note in one mutation.
    /// Returns (created, updated, unchanged).
    fn merge(
        &self,
        category: &str,
        starter: &str,
        records: Vec<ComboRecord>,
        note: Option<&str>,
    ) -> Result<(u32, u32, u32), CatalogError> {
        self.store.mutate(|catalog| {
            // The starter may have been removed while we were fetching.
            if !catalog.has_starter(category, starter) {
                return Err(CatalogError::Invalid(format!(
                    "starter {} no longer exists in {}",
                    starter, category
                )));
            }
            if let Some(note) = note {
                catalog.set_starter_note(category, starter, note)?;
            }
            let mut counts = (0, 0, 0);
            for record in records {
                match catalog.upsert_combo(record) {
                    UpsertOutcome::Created => counts.0 += 1,
                    UpsertOutcome::Updated => counts.1 += 1,
                    UpsertOutcome::Unchanged => counts.2 += 1,
                }
            }
            Ok(counts)
        })
    }

    async fn cancelled(
        &self,
        control: &ImportControl,
        category: &str,
        starter: &str,
        playlist_id: &PlaylistId,
    ) -> Result<ImportReport, ImportError> {
        control.set_stage(ImportStage::Cancelled);
        info!(category = %category, starter = %starter, "Import cancelled");
        emit_opt(
            &self.events,
            SyncEvent::ImportCancelled {
                category: category.to_string(),
                starter: starter.to_string(),
                playlist_id: playlist_id.to_string(),
            },
        )
        .await;
        Err(ImportError::Cancelled)
    }
}

/// Keep the last occurrence of each video, in first-seen order.
/// Returns the kept records and the ids of the dropped copies.
fn dedupe_records(records: Vec<ComboRecord>) -> (Vec<ComboRecord>, Vec<String>) {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<ComboRecord> = Vec::with_capacity(records.len());
    let mut dropped = Vec::new();
    for record in records {
        match positions.get(&record.external_video_id) {
            Some(&index) => {
                dropped.push(record.external_video_id.clone());
                kept[index] = record;
            }
            None => {
                positions.insert(record.external_video_id.clone(), kept.len());
                kept.push(record);
            }
        }
    }
    (kept, dropped)
}
