//! Combo catalog: data model, crash-safe file handling and the store that
//! owns the single live catalog instance.

mod persistence;
mod store;
mod types;

pub use persistence::{CatalogFile, LoadOutcome, PersistenceError, Recovery, WriteOutcome};
pub use store::CatalogStore;
pub use types::*;
