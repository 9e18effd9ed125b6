//! TTL cache for upstream API responses.
//!
//! Identical requests are collapsed twice over: canonical [`CacheKey`]s make
//! differently shaped but equivalent requests share an entry, and
//! [`RequestCache::get_or_fetch`] attaches concurrent callers to a single
//! in-flight fetch instead of issuing another upstream call.

mod key;
mod request_cache;

pub use key::{CacheKey, CacheKeyBuilder};
pub use request_cache::{CacheStats, RequestCache};
