//! Crash-safe catalog file handling.
//!
//! Writes go to a temporary file in the target directory, are synced, and
//! are then renamed over the target. The previous target, if valid and not
//! already the newest backup, is copied into the backup directory first. Loading falls back to the newest
//! valid backup when the primary file is missing or corrupt.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::types::Catalog;
use crate::config::CatalogConfig;
use crate::events::RecoveryCode;

const BACKUP_TIMESTAMP: &str = "%Y%m%dT%H%M%S%.9fZ";

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize catalog: {0}")]
    Serialize(String),

    #[error("Persistence task failed: {0}")]
    Task(String),

    #[error("Catalog store is shut down")]
    Closed,
}

impl PersistenceError {
    fn io(path: &Path, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Files touched by a successful write.
#[derive(Debug, Clone, Default)]
pub struct WriteOutcome {
    /// Backup of the previous primary, if one was taken.
    pub backup: Option<PathBuf>,
    /// Backups deleted by retention.
    pub pruned: Vec<PathBuf>,
}

/// Fallback taken while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub code: RecoveryCode,
    pub detail: String,
    pub restored_from: Option<PathBuf>,
    /// Where the corrupt primary was moved, if it existed.
    pub quarantined: Option<PathBuf>,
}

/// Result of loading the catalog from disk.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub catalog: Catalog,
    /// `None` when the primary loaded cleanly or nothing existed yet.
    pub recovery: Option<Recovery>,
}

enum ReadError {
    Missing,
    Invalid(String),
}

/// The primary catalog file plus its backup directory.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    path: PathBuf,
    backup_dir: PathBuf,
    retention: usize,
}

impl CatalogFile {
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            path: path.into(),
            backup_dir: backup_dir.into(),
            retention,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(config.path.clone(), config.backup_dir(), config.backup_retention)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog.json".to_string())
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".to_string())
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Atomically replace the primary file with `catalog`.
    pub fn write(&self, catalog: &Catalog) -> Result<WriteOutcome, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(catalog)
            .map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", self.file_name(), uuid::Uuid::new_v4()));
        if let Err(e) = write_synced(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(PersistenceError::io(&tmp, e));
        }

        let mut outcome = WriteOutcome::default();
        match self.backup_current() {
            Ok(Some(backup)) => {
                outcome.backup = Some(backup);
                outcome.pruned = self.prune_backups();
            }
            Ok(None) => {}
            // A failed backup must not block saving newer data.
            Err(e) => warn!("Failed to back up catalog before write: {}", e),
        }

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(PersistenceError::io(&self.path, e));
        }
        sync_dir(&dir);

        debug!(path = %self.path.display(), bytes = bytes.len(), "Catalog written");
        Ok(outcome)
    }

    /// Copy the current primary to the backup directory if it is valid.
    ///
    /// Skipped when the newest backup already holds the same bytes, so
    /// retried writes that never replaced the primary add no copies.
    fn backup_current(&self) -> Result<Option<PathBuf>, PersistenceError> {
        if self.retention == 0 {
            return Ok(None);
        }
        let current = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("Not backing up unreadable catalog file: {}", e);
                return Ok(None);
            }
        };
        if let Err(ReadError::Invalid(detail)) = parse_catalog(&current) {
            warn!("Not backing up invalid catalog file: {}", detail);
            return Ok(None);
        }

        if let Some(newest) = self.backups()?.first() {
            if fs::read(newest).map_or(false, |bytes| bytes == current) {
                debug!(backup = %newest.display(), "Newest backup already matches catalog");
                return Ok(None);
            }
        }

        fs::create_dir_all(&self.backup_dir)
            .map_err(|e| PersistenceError::io(&self.backup_dir, e))?;

        let target = self.next_backup_path(Utc::now());
        write_synced(&target, &current).map_err(|e| PersistenceError::io(&target, e))?;
        Ok(Some(target))
    }

    fn next_backup_path(&self, mut at: DateTime<Utc>) -> PathBuf {
        let stem = self.stem();
        loop {
            let candidate = self
                .backup_dir
                .join(format!("{}.{}.json", stem, at.format(BACKUP_TIMESTAMP)));
            if !candidate.exists() {
                return candidate;
            }
            at += ChronoDuration::nanoseconds(1);
        }
    }

    /// Delete all but the newest `retention` backups.
    fn prune_backups(&self) -> Vec<PathBuf> {
        let backups = match self.backups() {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to list backups: {}", e);
                return Vec::new();
            }
        };

        let mut pruned = Vec::new();
        for old in backups.into_iter().skip(self.retention) {
            match fs::remove_file(&old) {
                Ok(()) => pruned.push(old),
                Err(e) => warn!("Failed to remove old backup {}: {}", old.display(), e),
            }
        }
        pruned
    }

    /// Backup files for this catalog, newest first.
    pub fn backups(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&self.backup_dir, e)),
        };

        let prefix = format!("{}.", self.stem());
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json"))
                    .and_then(|ts| NaiveDateTime::parse_from_str(ts, "%Y%m%dT%H%M%S%.fZ").ok())
                    .is_some()
            })
            .collect();

        // Timestamps are fixed-width, so name order is time order.
        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names.into_iter().map(|n| self.backup_dir.join(n)).collect())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the catalog, recovering from backups when needed. Never fails.
    pub fn load(&self) -> LoadOutcome {
        let problem = match read_catalog(&self.path) {
            Ok(catalog) => {
                info!(
                    path = %self.path.display(),
                    combos = catalog.combos.len(),
                    "Loaded catalog"
                );
                return LoadOutcome {
                    catalog,
                    recovery: None,
                };
            }
            Err(ReadError::Missing) => None,
            Err(ReadError::Invalid(detail)) => Some(detail),
        };

        let quarantined = problem.as_ref().and_then(|_| self.quarantine_primary());
        let detail = match &problem {
            Some(detail) => format!("primary catalog unusable: {}", detail),
            None => "primary catalog missing".to_string(),
        };

        let backups = self.backups().unwrap_or_else(|e| {
            warn!("Failed to list backups: {}", e);
            Vec::new()
        });

        if problem.is_none() && backups.is_empty() {
            info!(path = %self.path.display(), "No catalog found, starting empty");
            return LoadOutcome {
                catalog: Catalog::new(),
                recovery: None,
            };
        }

        for backup in &backups {
            match read_catalog(backup) {
                Ok(catalog) => {
                    warn!(
                        backup = %backup.display(),
                        "{}, restored newest valid backup", detail
                    );
                    return LoadOutcome {
                        catalog,
                        recovery: Some(Recovery {
                            code: RecoveryCode::BackupRestored,
                            detail,
                            restored_from: Some(backup.clone()),
                            quarantined,
                        }),
                    };
                }
                Err(ReadError::Missing) => {}
                Err(ReadError::Invalid(why)) => {
                    warn!(backup = %backup.display(), "Skipping invalid backup: {}", why)
                }
            }
        }

        warn!("{} and no valid backup exists, starting empty", detail);
        LoadOutcome {
            catalog: Catalog::new(),
            recovery: Some(Recovery {
                code: RecoveryCode::DataLoss,
                detail: format!("{}; no valid backup", detail),
                restored_from: None,
                quarantined,
            }),
        }
    }

    /// Move a corrupt primary aside so it is neither overwritten nor backed up.
    fn quarantine_primary(&self) -> Option<PathBuf> {
        let target = self.quarantine_path(Utc::now());
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                warn!(to = %target.display(), "Quarantined corrupt catalog file");
                Some(target)
            }
            Err(e) => {
                warn!("Failed to quarantine corrupt catalog: {}", e);
                None
            }
        }
    }

    fn quarantine_path(&self, mut at: DateTime<Utc>) -> PathBuf {
        loop {
            let candidate = PathBuf::from(format!(
                "{}.corrupted-{}",
                self.path.display(),
                at.format(BACKUP_TIMESTAMP)
            ));
            if !candidate.exists() {
                return candidate;
            }
            at += ChronoDuration::nanoseconds(1);
        }
    }
}

fn read_catalog(path: &Path) -> Result<Catalog, ReadError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadError::Missing),
        Err(e) => return Err(ReadError::Invalid(format!("unreadable: {}", e))),
    };
    parse_catalog(&bytes)
}

fn parse_catalog(bytes: &[u8]) -> Result<Catalog, ReadError> {
    let catalog: Catalog = serde_json::from_slice(bytes)
        .map_err(|e| ReadError::Invalid(format!("malformed: {}", e)))?;
    catalog
        .validate()
        .map_err(|e| ReadError::Invalid(e.to_string()))?;
    Ok(catalog)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Make the rename itself durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Failed to sync directory {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ComboRecord, SCHEMA_VERSION};
    use tempfile::TempDir;

    fn file(dir: &TempDir, retention: usize) -> CatalogFile {
        CatalogFile::new(
            dir.path().join("combos.json"),
            dir.path().join("backups"),
            retention,
        )
    }

    fn catalog_with(n: usize) -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_category("Corner").unwrap();
        catalog.add_starter("Corner", "2A").unwrap();
        for i in 0..n {
            catalog.upsert_combo(ComboRecord {
                external_video_id: format!("vid{}", i),
                category: "Corner".to_string(),
                starter: "2A".to_string(),
                notation: format!("2A > 5B x{}", i),
                notes: None,
                imported_at: Utc::now(),
            });
        }
        catalog
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);

        let catalog = catalog_with(2);
        let outcome = file.write(&catalog).unwrap();
        assert!(outcome.backup.is_none());

        let loaded = file.load();
        assert!(loaded.recovery.is_none());
        assert_eq!(loaded.catalog, catalog);
    }

    #[test]
    fn test_fresh_start_is_not_a_recovery() {
        let dir = TempDir::new().unwrap();
        let loaded = file(&dir, 3).load();
        assert!(loaded.recovery.is_none());
        assert_eq!(loaded.catalog.schema_version, SCHEMA_VERSION);
        assert!(loaded.catalog.combos.is_empty());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        file.write(&catalog_with(1)).unwrap();
        file.write(&catalog_with(2)).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_retention_keeps_newest_backups() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 2);

        // Four writes produce three backups (of snapshots 1, 2 and 3).
        for n in 1..=4 {
            file.write(&catalog_with(n)).unwrap();
        }

        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 2);
        let sizes: Vec<usize> = backups
            .iter()
            .map(|b| read_catalog(b).ok().unwrap().combos.len())
            .collect();
        assert_eq!(sizes, vec![3, 2]);
    }

    #[test]
    fn test_corrupt_primary_falls_back_to_backup() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        file.write(&catalog_with(1)).unwrap();
        file.write(&catalog_with(2)).unwrap();

        fs::write(file.path(), b"{\"schema_version\": 1, \"combos\": [").unwrap();

        let loaded = file.load();
        let recovery = loaded.recovery.expect("should report recovery");
        assert_eq!(recovery.code, RecoveryCode::BackupRestored);
        assert!(recovery.restored_from.is_some());
        assert_eq!(loaded.catalog.combos.len(), 1);

        let quarantined = recovery.quarantined.expect("corrupt file moved aside");
        assert!(quarantined.exists());
        assert!(!file.path().exists());
    }

    #[test]
    fn test_schema_violation_counts_as_corrupt() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        fs::write(file.path(), br#"{"schema_version": 99}"#).unwrap();

        let loaded = file.load();
        let recovery = loaded.recovery.unwrap();
        assert_eq!(recovery.code, RecoveryCode::DataLoss);
        assert!(loaded.catalog.combos.is_empty());
    }

    #[test]
    fn test_invalid_backups_are_skipped() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 5);
        file.write(&catalog_with(1)).unwrap();
        file.write(&catalog_with(2)).unwrap();
        file.write(&catalog_with(3)).unwrap();

        let backups = file.backups().unwrap();
        fs::write(&backups[0], b"garbage").unwrap();
        fs::remove_file(file.path()).unwrap();

        let loaded = file.load();
        let recovery = loaded.recovery.unwrap();
        assert_eq!(recovery.code, RecoveryCode::BackupRestored);
        assert_eq!(recovery.restored_from.as_ref(), Some(&backups[1]));
        assert!(recovery.quarantined.is_none());
        assert_eq!(loaded.catalog.combos.len(), 1);
    }

    #[test]
    fn test_invalid_primary_is_not_backed_up() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        fs::write(file.path(), b"not json").unwrap();

        let outcome = file.write(&catalog_with(1)).unwrap();
        assert!(outcome.backup.is_none());
        assert!(file.backups().unwrap().is_empty());
    }

    #[test]
    fn test_unrelated_files_ignored_in_backup_dir() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        fs::create_dir_all(file.backup_dir()).unwrap();
        fs::write(file.backup_dir().join("combos.notes.json"), b"{}").unwrap();
        fs::write(file.backup_dir().join("other.json"), b"{}").unwrap();

        assert!(file.backups().unwrap().is_empty());
    }

    #[test]
    fn test_unchanged_primary_is_backed_up_once() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);
        file.write(&catalog_with(1)).unwrap();

        // Retries after a failed rename see the same primary each time.
        assert!(file.backup_current().unwrap().is_some());
        assert!(file.backup_current().unwrap().is_none());
        assert!(file.backup_current().unwrap().is_none());

        let outcome = file.write(&catalog_with(2)).unwrap();
        assert!(outcome.backup.is_none());
        assert!(outcome.pruned.is_empty());

        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(read_catalog(&backups[0]).ok().unwrap().combos.len(), 1);

        // The next write backs up the new primary as usual.
        assert!(file.write(&catalog_with(3)).unwrap().backup.is_some());
        assert_eq!(file.backups().unwrap().len(), 2);
    }

    #[test]
    fn test_repeated_quarantines_keep_every_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let file = file(&dir, 3);

        fs::write(file.path(), b"first corrupt").unwrap();
        let first = file.load().recovery.unwrap().quarantined.unwrap();
        fs::write(file.path(), b"second corrupt").unwrap();
        let second = file.load().recovery.unwrap().quarantined.unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"first corrupt");
        assert_eq!(fs::read(&second).unwrap(), b"second corrupt");
    }
}
