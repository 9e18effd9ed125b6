//! Catalog persistence integration tests.
//!
//! Exercise `CatalogStore` and `CatalogFile` together against a real
//! temporary directory: save cycles, backup rotation, interrupted writes and
//! recovery on the next start.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_test::assert_ok;

use combot_core::{
    config::CatalogConfig, create_event_system, testing::fixtures, CatalogFile, CatalogStore,
    EventSink, MemorySink, RecoveryCode, SyncEvent,
};

struct TestHarness {
    config: CatalogConfig,
    temp_dir: TempDir,
}

impl TestHarness {
    fn new(retention: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = CatalogConfig {
            path: temp_dir.path().join("catalog.json"),
            backup_dir: Some(temp_dir.path().join("backups")),
            backup_retention: retention,
            debounce_ms: 60_000,
        };
        Self { config, temp_dir }
    }

    fn file(&self) -> CatalogFile {
        CatalogFile::from_config(&self.config)
    }

    fn primary(&self) -> PathBuf {
        self.config.path.clone()
    }

    /// Start a store the way the CLI does, capturing its events.
    async fn open(&self) -> (CatalogStore, combot_core::LoadOutcome, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let (events, writer) = create_event_system(Arc::clone(&sink) as Arc<dyn EventSink>, 64);
        tokio::spawn(writer.run());
        let (store, outcome) = CatalogStore::open(&self.config, Some(events)).await;
        (store, outcome, sink)
    }
}

// =============================================================================
// Save Cycles
// =============================================================================

#[tokio::test]
async fn test_shutdown_saves_pending_changes_across_restarts() {
    let harness = TestHarness::new(3);

    let (store, outcome, _) = harness.open().await;
    assert!(outcome.recovery.is_none());
    assert_ok!(store.mutate(|c| {
        *c = fixtures::sample_catalog();
        c.upsert_combo(fixtures::combo("vid0", "5A > 5B"));
        Ok(())
    }));
    assert!(store.is_dirty());
    assert_ok!(store.shutdown().await);

    let (reopened, outcome, _) = harness.open().await;
    assert!(outcome.recovery.is_none());
    assert_eq!(*reopened.read(), *store.read());
    assert!(!reopened.is_dirty());
}

#[tokio::test]
async fn test_save_cycles_keep_newest_backups() {
    let harness = TestHarness::new(3);
    let (store, _, _) = harness.open().await;

    // The first save has no previous primary to back up; the next four do.
    for i in 0..5 {
        let name = format!("Category {}", i);
        assert_ok!(store.mutate(|c| c.add_category(&name)));
        assert_ok!(store.flush().await);
    }

    let backups = assert_ok!(harness.file().backups());
    assert_eq!(backups.len(), 3);

    // Newest backup holds the state before the last save.
    let newest: combot_core::Catalog =
        serde_json::from_slice(&fs::read(&backups[0]).expect("read backup")).expect("parse");
    assert_eq!(newest.categories.len(), 4);
}

// =============================================================================
// Crash Safety
// =============================================================================

#[tokio::test]
async fn test_interrupted_write_leaves_primary_loadable() {
    let harness = TestHarness::new(3);
    let file = harness.file();
    let catalog = fixtures::sample_catalog();
    assert_ok!(file.write(&catalog));

    // A crash mid-write leaves a truncated temp file next to the primary.
    let full = serde_json::to_vec_pretty(&fixtures::sample_catalog()).expect("serialize");
    let partial = harness
        .temp_dir
        .path()
        .join(".catalog.json.00000000-0000-0000-0000-000000000000.tmp");
    fs::write(&partial, &full[..full.len() / 2]).expect("write partial");

    let (store, outcome, _) = harness.open().await;
    assert!(outcome.recovery.is_none());
    assert_eq!(*store.read(), catalog);

    // The next save still succeeds.
    assert_ok!(store.mutate(|c| c.add_starter("Corner", "2B")));
    assert_ok!(store.flush().await);
    assert!(file.load().catalog.has_starter("Corner", "2B"));
}

#[tokio::test]
async fn test_corrupt_primary_restores_newest_backup() {
    let harness = TestHarness::new(3);
    let file = harness.file();

    let mut older = fixtures::sample_catalog();
    assert_ok!(file.write(&older));
    older.add_category("Air").expect("add category");
    assert_ok!(file.write(&older));

    fs::write(harness.primary(), b"{\"schema_version\": 1, \"categ").expect("corrupt primary");

    let (store, outcome, sink) = harness.open().await;

    let recovery = outcome.recovery.expect("recovery reported");
    assert_eq!(recovery.code, RecoveryCode::BackupRestored);
    assert!(recovery.restored_from.is_some());
    let quarantined = recovery.quarantined.expect("corrupt file kept");
    assert!(quarantined.exists());

    // The backup holds the state before the last write.
    assert_eq!(*store.read(), fixtures::sample_catalog());
    assert!(store.is_dirty());

    assert_ok!(store.flush().await);
    let reloaded = file.load();
    assert!(reloaded.recovery.is_none());
    assert_eq!(reloaded.catalog, fixtures::sample_catalog());

    let mut recovered = false;
    for _ in 0..100 {
        recovered = sink.events().iter().any(|e| {
            matches!(
                e,
                SyncEvent::CorruptionRecovered {
                    code: RecoveryCode::BackupRestored,
                    ..
                }
            )
        });
        if recovered {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(recovered);
}

#[tokio::test]
async fn test_corrupt_primary_without_backup_reports_data_loss() {
    let harness = TestHarness::new(3);
    fs::write(harness.primary(), b"not json at all").expect("write garbage");

    let (store, outcome, _) = harness.open().await;

    let recovery = outcome.recovery.expect("recovery reported");
    assert_eq!(recovery.code, RecoveryCode::DataLoss);
    assert!(recovery.restored_from.is_none());
    assert!(store.read().categories.is_empty());
    assert!(!store.is_dirty());
    assert!(!harness.primary().exists());
}
