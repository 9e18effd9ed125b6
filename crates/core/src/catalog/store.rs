//! In-memory catalog with serialized mutation and debounced persistence.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::persistence::{CatalogFile, LoadOutcome, PersistenceError};
use super::types::{Catalog, CatalogError};
use crate::config::CatalogConfig;
use crate::events::{emit_opt, EventHandle, SyncEvent};

enum Command {
    Dirty,
    Flush(oneshot::Sender<Result<(), PersistenceError>>),
    Shutdown(oneshot::Sender<Result<(), PersistenceError>>),
}

#[derive(Clone)]
struct Snapshot {
    catalog: Arc<Catalog>,
    version: u64,
}

struct Shared {
    snapshot: RwLock<Snapshot>,
    /// Serializes `mutate` callers.
    write_lock: Mutex<()>,
    /// Version last written to disk.
    persisted: Mutex<u64>,
    file: CatalogFile,
    events: Option<EventHandle>,
}

impl Shared {
    fn snapshot(&self) -> Snapshot {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, catalog: Catalog) -> u64 {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        snapshot.version += 1;
        snapshot.catalog = Arc::new(catalog);
        snapshot.version
    }

    fn persisted(&self) -> MutexGuard<'_, u64> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of the catalog.
///
/// Reads return the last committed snapshot and never wait on writers.
/// Mutations are applied one at a time to a copy which is validated and then
/// swapped in. A background task writes dirty state to disk once no mutation
/// has arrived for the debounce interval.
///
/// Cloning is cheap; all clones share the same catalog. The background task
/// stops after a final write once [`CatalogStore::shutdown`] is called or the
/// last clone is dropped.
#[derive(Clone)]
pub struct CatalogStore {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl CatalogStore {
    /// Create a store holding an empty catalog. Must be called inside a
    /// tokio runtime.
    pub fn new(file: CatalogFile, debounce: Duration, events: Option<EventHandle>) -> Self {
        let shared = Arc::new(Shared {
            snapshot: RwLock::new(Snapshot {
                catalog: Arc::new(Catalog::new()),
                version: 0,
            }),
            write_lock: Mutex::new(()),
            persisted: Mutex::new(0),
            file,
            events,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persistence(Arc::clone(&shared), rx, debounce));

        Self {
            shared,
            commands: tx,
        }
    }

    /// Create a store from config and hydrate it from disk.
    pub async fn open(config: &CatalogConfig, events: Option<EventHandle>) -> (Self, LoadOutcome) {
        let store = Self::new(CatalogFile::from_config(config), config.debounce(), events);
        let outcome = store.load().await;
        (store, outcome)
    }

    pub fn file(&self) -> &CatalogFile {
        &self.shared.file
    }

    /// Current committed catalog.
    pub fn read(&self) -> Arc<Catalog> {
        self.shared.snapshot().catalog
    }

    /// Whether committed state has not reached disk yet.
    pub fn is_dirty(&self) -> bool {
        let version = self.shared.snapshot().version;
        *self.shared.persisted() != version
    }

    /// Apply `f` under exclusive access.
    ///
    /// `f` works on a copy. If it fails, or the result fails validation,
    /// nothing is committed. A call that leaves the catalog unchanged does
    /// not mark the store dirty.
    pub fn mutate<T, F>(&self, f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&mut Catalog) -> Result<T, CatalogError>,
    {
        let _guard = self
            .shared
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = self.read();
        let mut next = Catalog::clone(&current);
        let out = f(&mut next)?;

        if next == *current {
            return Ok(out);
        }
        next.validate()?;

        let version = self.shared.replace(next);
        debug!(version, "Catalog mutation committed");
        if self.commands.send(Command::Dirty).is_err() {
            warn!("Catalog store is shut down; change will not be persisted");
        }
        Ok(out)
    }

    /// Write pending changes now instead of waiting for the debounce.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(tx))
            .map_err(|_| PersistenceError::Closed)?;
        rx.await.map_err(|_| PersistenceError::Closed)?
    }

    /// Replace the in-memory catalog with what is on disk.
    ///
    /// Recovery from a corrupt or missing primary is reported as a
    /// `CorruptionRecovered` event and in the returned outcome, never as an
    /// error. A catalog restored from backup is scheduled to be rewritten as
    /// the new primary.
    pub async fn load(&self) -> LoadOutcome {
        let file = self.shared.file.clone();
        let outcome = match tokio::task::spawn_blocking(move || file.load()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Catalog load task failed: {}", e);
                LoadOutcome {
                    catalog: Catalog::new(),
                    recovery: None,
                }
            }
        };

        let version = {
            let _guard = self
                .shared
                .write_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.shared.replace(outcome.catalog.clone())
        };

        match &outcome.recovery {
            Some(recovery) => {
                emit_opt(
                    &self.shared.events,
                    SyncEvent::CorruptionRecovered {
                        code: recovery.code,
                        detail: recovery.detail.clone(),
                        restored_from: recovery
                            .restored_from
                            .as_ref()
                            .map(|p| p.display().to_string()),
                    },
                )
                .await;
                if recovery.restored_from.is_some() {
                    let _ = self.commands.send(Command::Dirty);
                } else {
                    *self.shared.persisted() = version;
                }
            }
            None => *self.shared.persisted() = version,
        }

        outcome
    }

    /// Flush once more and stop the background task.
    pub async fn shutdown(&self) -> Result<(), PersistenceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .map_err(|_| PersistenceError::Closed)?;
        rx.await.map_err(|_| PersistenceError::Closed)?
    }
}

async fn run_persistence(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                command = rx.recv() => command,
                _ = tokio::time::sleep_until(at) => {
                    deadline = match persist(&shared).await {
                        Ok(()) => None,
                        Err(_) => Some(Instant::now() + debounce),
                    };
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Dirty) => {
                deadline = Some(Instant::now() + debounce);
            }
            Some(Command::Flush(reply)) => {
                let result = persist(&shared).await;
                deadline = result.is_err().then(|| Instant::now() + debounce);
                let _ = reply.send(result);
            }
            Some(Command::Shutdown(reply)) => {
                let _ = reply.send(persist(&shared).await);
                break;
            }
            None => {
                if let Err(e) = persist(&shared).await {
                    error!("Final catalog write failed: {}", e);
                }
                break;
            }
        }
    }

    debug!("Catalog persistence task stopped");
}

/// Write the current snapshot if it is newer than what is on disk.
async fn persist(shared: &Arc<Shared>) -> Result<(), PersistenceError> {
    let snapshot = shared.snapshot();
    if *shared.persisted() >= snapshot.version {
        return Ok(());
    }

    let file = shared.file.clone();
    let catalog = Arc::clone(&snapshot.catalog);
    let result = tokio::task::spawn_blocking(move || file.write(&catalog))
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))
        .and_then(|r| r);

    let path = shared.file.path().display().to_string();
    match result {
        Ok(outcome) => {
            *shared.persisted() = snapshot.version;
            info!(
                path = %path,
                version = snapshot.version,
                combos = snapshot.catalog.combos.len(),
                "Catalog saved"
            );
            if let Some(backup) = outcome.backup {
                emit_opt(
                    &shared.events,
                    SyncEvent::BackupRotated {
                        backup: backup.display().to_string(),
                        removed: outcome
                            .pruned
                            .iter()
                            .map(|p| p.display().to_string())
                            .collect(),
                    },
                )
                .await;
            }
            emit_opt(
                &shared.events,
                SyncEvent::CatalogSaved {
                    path,
                    combo_count: snapshot.catalog.combos.len(),
                },
            )
            .await;
            Ok(())
        }
        Err(e) => {
            error!(path = %path, "Catalog save failed, will retry: {}", e);
            emit_opt(
                &shared.events,
                SyncEvent::PersistenceFailed {
                    path,
                    error: e.to_string(),
                },
            )
            .await;
            Err(e)
        }
    }
}
