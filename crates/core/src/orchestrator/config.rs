//! Import configuration.

use serde::{Deserialize, Serialize};

/// Configuration for playlist imports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Write the catalog as soon as an import commits instead of waiting
    /// for the debounce interval.
    #[serde(default)]
    pub flush_on_complete: bool,
}
