//! Sync event log.
//!
//! Components report notable outcomes (imports, saves, recovery) through a
//! cloneable [`EventHandle`]. A background [`EventWriter`] drains the channel
//! into an [`EventSink`].

mod types;
mod handle;
mod sink;
mod writer;

pub use types::*;
pub use handle::*;
pub use sink::*;
pub use writer::*;
