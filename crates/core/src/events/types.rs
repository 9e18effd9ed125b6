use serde::{Deserialize, Serialize};

/// Why a load fell back away from the primary catalog file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryCode {
    /// The newest valid backup was loaded.
    BackupRestored,
    /// Neither the primary nor any backup was usable; started empty.
    DataLoss,
}

impl RecoveryCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryCode::BackupRestored => "backup_restored",
            RecoveryCode::DataLoss => "data_loss",
        }
    }
}

/// Sync event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    // Import lifecycle
    ImportStarted {
        category: String,
        starter: String,
        playlist_id: String,
    },
    ImportCompleted {
        category: String,
        starter: String,
        playlist_id: String,
        imported: u32,
        skipped: u32,
        failed: u32,
    },
    /// A duplicate import for a key already in flight was turned away.
    ImportRejected {
        category: String,
        starter: String,
    },
    ImportCancelled {
        category: String,
        starter: String,
        playlist_id: String,
    },

    // Persistence
    CatalogSaved {
        path: String,
        combo_count: usize,
    },
    PersistenceFailed {
        path: String,
        error: String,
    },
    BackupRotated {
        backup: String,
        removed: Vec<String>,
    },
    CorruptionRecovered {
        code: RecoveryCode,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        restored_from: Option<String>,
    },
}

impl SyncEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ImportStarted { .. } => "import_started",
            SyncEvent::ImportCompleted { .. } => "import_completed",
            SyncEvent::ImportRejected { .. } => "import_rejected",
            SyncEvent::ImportCancelled { .. } => "import_cancelled",
            SyncEvent::CatalogSaved { .. } => "catalog_saved",
            SyncEvent::PersistenceFailed { .. } => "persistence_failed",
            SyncEvent::BackupRotated { .. } => "backup_rotated",
            SyncEvent::CorruptionRecovered { .. } => "corruption_recovered",
        }
    }

    /// Whether this event signals a problem an operator should look at.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            SyncEvent::PersistenceFailed { .. } | SyncEvent::CorruptionRecovered { .. }
        )
    }
}
