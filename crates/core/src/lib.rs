pub mod cache;
pub mod catalog;
pub mod config;
pub mod events;
pub mod fetcher;
pub mod orchestrator;
pub mod parser;
pub mod testing;
pub mod youtube;

pub use cache::{CacheKey, CacheKeyBuilder, CacheStats, RequestCache};
pub use catalog::{
    Catalog, CatalogError, CatalogFile, CatalogStore, Category, ComboRecord, LoadOutcome,
    PersistenceError, Player, Recovery, Resource, UpsertOutcome, SCHEMA_VERSION,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{
    create_event_system, EventEnvelope, EventHandle, EventSink, EventWriter, LogSink, MemorySink,
    RecoveryCode, SyncEvent,
};
pub use fetcher::{
    FetchError, InfoCache, PageCache, PageError, PlaylistFetcher, PlaylistItems, QuotaExceeded,
    RateLimiter,
};
pub use orchestrator::{
    CancelRejected, ImportConfig, ImportError, ImportHandle, ImportReport, ImportStage,
    SkippedItem, SyncOrchestrator,
};
pub use parser::{
    playlist_note, DescriptionParser, ParseFailure, ParsedDescription, DEFAULT_PLAYLIST_NOTE,
};
pub use youtube::{
    extract_playlist_id, PlaylistId, PlaylistInfo, PlaylistPage, PlaylistSource, RawItem,
    SourceError, YoutubeClient,
};
