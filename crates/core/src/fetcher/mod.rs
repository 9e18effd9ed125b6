//! Paginated playlist fetching.
//!
//! [`PlaylistFetcher`] walks a playlist page by page through the upstream
//! [`PlaylistSource`]. Every page request goes through the shared
//! [`RequestCache`] first; only a miss that is not already in flight takes a
//! [`RateLimiter`] permit and reaches the network. Playlist metadata
//! requests follow the same path through a separate [`InfoCache`].

mod rate_limiter;

pub use rate_limiter::{Permit, QuotaExceeded, RateLimitStatus, RateLimiter, TokenBucket};

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheKey, RequestCache};
use crate::config::{Config, RetryConfig};
use crate::youtube::{
    PlaylistId, PlaylistInfo, PlaylistPage, PlaylistSource, RawItem, SourceError,
};

/// Cache type shared by every fetcher talking to the same upstream.
pub type PageCache = RequestCache<PlaylistPage, PageError>;

/// Cache for playlist metadata, owned by one fetcher.
pub type InfoCache = RequestCache<PlaylistInfo, PageError>;

/// Outcome of a single page fetch, shared between coalesced waiters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("{0}")]
    Permanent(String),

    #[error("request quota exceeded, retry in {}ms", .0.as_millis())]
    QuotaExceeded(Duration),
}

/// Terminal failure of a playlist item sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch failed after {pages_fetched} page(s): {reason}")]
    Permanent { reason: String, pages_fetched: u32 },

    #[error("request quota exceeded after {pages_fetched} page(s), retry in {}ms", .retry_after.as_millis())]
    QuotaExceeded {
        retry_after: Duration,
        pages_fetched: u32,
    },
}

impl FetchError {
    fn from_page(err: PageError, pages_fetched: u32) -> Self {
        match err {
            PageError::Permanent(reason) => FetchError::Permanent {
                reason,
                pages_fetched,
            },
            PageError::QuotaExceeded(retry_after) => FetchError::QuotaExceeded {
                retry_after,
                pages_fetched,
            },
        }
    }

    /// Pages successfully produced before the failure.
    pub fn pages_fetched(&self) -> u32 {
        match self {
            FetchError::Permanent { pages_fetched, .. }
            | FetchError::QuotaExceeded { pages_fetched, .. } => *pages_fetched,
        }
    }
}

/// Fetches playlist items through the rate limiter and request cache.
#[derive(Clone)]
pub struct PlaylistFetcher {
    source: Arc<dyn PlaylistSource>,
    limiter: Arc<RateLimiter>,
    cache: PageCache,
    info_cache: InfoCache,
    retry: RetryConfig,
    ttl: Duration,
    max_items: usize,
    prefetch: bool,
}

impl PlaylistFetcher {
    pub fn new(source: Arc<dyn PlaylistSource>, limiter: Arc<RateLimiter>, cache: PageCache) -> Self {
        Self {
            source,
            limiter,
            cache,
            info_cache: InfoCache::new(),
            retry: RetryConfig::default(),
            ttl: Duration::from_secs(600),
            max_items: 200,
            prefetch: true,
        }
    }

    /// Build a fetcher with retry, TTL and item limits taken from config.
    pub fn from_config(
        source: Arc<dyn PlaylistSource>,
        limiter: Arc<RateLimiter>,
        cache: PageCache,
        config: &Config,
    ) -> Self {
        Self::new(source, limiter, cache)
            .with_retry(config.fetch.retry.clone())
            .with_ttl(config.cache.ttl())
            .with_max_items(config.youtube.max_items)
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Fetch page N+1 in the background while page N is consumed.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn info_cache(&self) -> &InfoCache {
        &self.info_cache
    }

    /// Start a lazy, finite item sequence for `playlist_id`.
    ///
    /// Nothing is requested until the first call to [`PlaylistItems::next`].
    pub fn fetch_items(&self, playlist_id: PlaylistId) -> PlaylistItems {
        PlaylistItems {
            fetcher: self.clone(),
            playlist_id,
            buffer: VecDeque::new(),
            cursor: None,
            prefetched: None,
            remaining: self.max_items,
            pages_fetched: 0,
            unavailable: Vec::new(),
            done: false,
        }
    }

    /// Fetch a single page, served from cache when possible.
    pub async fn fetch_page(
        &self,
        playlist_id: &PlaylistId,
        cursor: Option<&str>,
    ) -> Result<PlaylistPage, PageError> {
        let key = CacheKey::builder("playlistItems")
            .param("playlistId", playlist_id.as_str())
            .opt_param("pageToken", cursor)
            .build();

        let source = Arc::clone(&self.source);
        let limiter = Arc::clone(&self.limiter);
        let retry = self.retry.clone();
        let playlist_id = playlist_id.clone();
        let cursor = cursor.map(str::to_string);

        self.cache
            .get_or_fetch(key, self.ttl, move || {
                let id = playlist_id.clone();
                fetch_with_retry(limiter, retry, playlist_id, move || {
                    let source = Arc::clone(&source);
                    let id = id.clone();
                    let cursor = cursor.clone();
                    async move {
                        let page = source.fetch_page(&id, cursor.as_deref()).await;
                        if let Ok(page) = &page {
                            debug!(
                                playlist_id = %id,
                                items = page.items.len(),
                                has_next = page.next_cursor.is_some(),
                                "Fetched playlist page"
                            );
                        }
                        page
                    }
                })
            })
            .await
    }

    /// Fetch a playlist's title and description, served from cache when possible.
    ///
    /// Takes a limiter permit on a miss and retries transient failures like
    /// page requests do.
    pub async fn fetch_info(&self, playlist_id: &PlaylistId) -> Result<PlaylistInfo, PageError> {
        let key = CacheKey::builder("playlists")
            .param("id", playlist_id.as_str())
            .build();

        let source = Arc::clone(&self.source);
        let limiter = Arc::clone(&self.limiter);
        let retry = self.retry.clone();
        let playlist_id = playlist_id.clone();

        self.info_cache
            .get_or_fetch(key, self.ttl, move || {
                let id = playlist_id.clone();
                fetch_with_retry(limiter, retry, playlist_id, move || {
                    let source = Arc::clone(&source);
                    let id = id.clone();
                    async move {
                        let info = source.fetch_info(&id).await;
                        if let Ok(info) = &info {
                            debug!(playlist_id = %id, title = %info.title, "Fetched playlist info");
                        }
                        info
                    }
                })
            })
            .await
    }
}

async fn fetch_with_retry<T, F, Fut>(
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    playlist_id: PlaylistId,
    mut request: F,
) -> Result<T, PageError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, SourceError>> + Send,
    T: Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        limiter
            .acquire()
            .await
            .map_err(|e| PageError::QuotaExceeded(e.retry_after))?;

        let err = match request().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if let SourceError::QuotaExhausted = err {
            let window = limiter.status().await.window_secs;
            return Err(PageError::QuotaExceeded(Duration::from_secs_f64(window)));
        }

        if !err.is_transient() {
            warn!(playlist_id = %playlist_id, error = %err, "Permanent fetch failure");
            return Err(PageError::Permanent(err.to_string()));
        }

        if attempt >= retry.max_attempts {
            warn!(
                playlist_id = %playlist_id,
                attempts = attempt,
                error = %err,
                "Giving up on playlist request"
            );
            return Err(PageError::Permanent(format!(
                "{} (after {} attempts)",
                err, attempt
            )));
        }

        let delay = retry.delay_for(attempt);
        warn!(
            playlist_id = %playlist_id,
            attempt,
            error = %err,
            "Transient fetch failure, retrying in {}ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
    }
}

/// Lazy sequence of playlist items.
///
/// Finite and not restartable: once it returns `None` or an error, every
/// further call returns `None`.
pub struct PlaylistItems {
    fetcher: PlaylistFetcher,
    playlist_id: PlaylistId,
    buffer: VecDeque<RawItem>,
    cursor: Option<String>,
    prefetched: Option<JoinHandle<Result<PlaylistPage, PageError>>>,
    remaining: usize,
    pages_fetched: u32,
    unavailable: Vec<String>,
    done: bool,
}

impl PlaylistItems {
    pub fn playlist_id(&self) -> &PlaylistId {
        &self.playlist_id
    }

    /// Pages produced so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Video ids dropped because the upstream marks them deleted or private.
    pub fn unavailable(&self) -> &[String] {
        &self.unavailable
    }

    /// Next item, or the error that ended the sequence.
    pub async fn next(&mut self) -> Option<Result<RawItem, FetchError>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }

            let page = match self.load_page().await {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(FetchError::from_page(e, self.pages_fetched)));
                }
            };
            self.pages_fetched += 1;
            self.accept(page);
        }
    }

    /// Adapt into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<RawItem, FetchError>> {
        futures::stream::unfold(self, |mut items| async move {
            items.next().await.map(|item| (item, items))
        })
    }

    async fn load_page(&mut self) -> Result<PlaylistPage, PageError> {
        if let Some(handle) = self.prefetched.take() {
            match handle.await {
                Ok(result) => return result,
                Err(e) => debug!("Prefetch task ended early: {}", e),
            }
        }
        self.fetcher
            .fetch_page(&self.playlist_id, self.cursor.as_deref())
            .await
    }

    fn accept(&mut self, page: PlaylistPage) {
        for item in page.items {
            if self.remaining == 0 {
                break;
            }
            self.remaining -= 1;
            if item.is_unavailable() {
                debug!(video_id = %item.video_id, "Skipping unavailable video");
                self.unavailable.push(item.video_id);
            } else {
                self.buffer.push_back(item);
            }
        }

        self.cursor = page.next_cursor;
        if self.cursor.is_none() || self.remaining == 0 {
            self.done = true;
            return;
        }

        if self.fetcher.prefetch {
            let fetcher = self.fetcher.clone();
            let playlist_id = self.playlist_id.clone();
            let cursor = self.cursor.clone();
            self.prefetched = Some(tokio::spawn(async move {
                fetcher.fetch_page(&playlist_id, cursor.as_deref()).await
            }));
        }
    }
}

impl Drop for PlaylistItems {
    fn drop(&mut self) {
        if let Some(handle) = self.prefetched.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockPlaylistSource};
    use futures::StreamExt;

    fn fetcher(source: Arc<MockPlaylistSource>) -> PlaylistFetcher {
        PlaylistFetcher::new(
            source,
            Arc::new(RateLimiter::new(
                100,
                Duration::from_secs(100),
                Duration::from_secs(5),
            )),
            PageCache::new(),
        )
        .with_retry(RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        })
        .with_prefetch(false)
    }

    async fn collect(items: &mut PlaylistItems) -> (Vec<RawItem>, Option<FetchError>) {
        let mut out = Vec::new();
        while let Some(result) = items.next().await {
            match result {
                Ok(item) => out.push(item),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[tokio::test]
    async fn test_pages_through_playlist_in_order() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(5, 2)).await;

        let mut items = fetcher(source.clone()).fetch_items(id);
        let (got, err) = collect(&mut items).await;

        assert!(err.is_none());
        let ids: Vec<_> = got.iter().map(|i| i.video_id.as_str()).collect();
        assert_eq!(ids, vec!["vid0", "vid1", "vid2", "vid3", "vid4"]);
        assert_eq!(items.pages_fetched(), 3);
        assert_eq!(source.call_count().await, 3);

        // Exhausted sequences stay exhausted.
        assert!(items.next().await.is_none());
        assert_eq!(source.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_nothing_fetched_until_polled() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(3, 3)).await;

        let _items = fetcher(source.clone()).fetch_items(id);
        assert_eq!(source.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_walk_served_from_cache() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(4, 2)).await;
        let fetcher = fetcher(source.clone());

        let (first, _) = collect(&mut fetcher.fetch_items(id.clone())).await;
        let (second, _) = collect(&mut fetcher.fetch_items(id)).await;

        assert_eq!(first, second);
        assert_eq!(source.call_count().await, 2);
        assert_eq!(fetcher.cache().stats().hits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(2, 10)).await;
        source
            .push_error(SourceError::Transport("connection reset".into()))
            .await;
        source
            .push_error(SourceError::Server {
                status: 503,
                message: "backend error".into(),
            })
            .await;

        let (got, err) = collect(&mut fetcher(source.clone()).fetch_items(id)).await;

        assert!(err.is_none());
        assert_eq!(got.len(), 2);
        assert_eq!(source.call_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_become_permanent() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(2, 10)).await;
        for _ in 0..3 {
            source.push_error(SourceError::RateLimited).await;
        }

        let (got, err) = collect(&mut fetcher(source.clone()).fetch_items(id)).await;

        assert!(got.is_empty());
        match err {
            Some(FetchError::Permanent {
                reason,
                pages_fetched,
            }) => {
                assert_eq!(pages_fetched, 0);
                assert!(reason.contains("after 3 attempts"));
            }
            other => panic!("expected permanent failure, got {:?}", other),
        }
        assert_eq!(source.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_not_found_aborts_with_pages_so_far() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(4, 2)).await;
        source
            .fail_page(&id, 1, SourceError::NotFound(id.to_string()))
            .await;

        let mut items = fetcher(source.clone()).fetch_items(id);
        let (got, err) = collect(&mut items).await;

        assert_eq!(got.len(), 2);
        assert_eq!(err.as_ref().map(FetchError::pages_fetched), Some(1));
        assert!(matches!(err, Some(FetchError::Permanent { .. })));
        // No retry for definitive failures.
        assert_eq!(source.call_count().await, 2);
        assert!(items.next().await.is_none());
    }

    #[tokio::test]
    async fn test_upstream_quota_is_terminal() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(2, 10)).await;
        source.push_error(SourceError::QuotaExhausted).await;

        let (_, err) = collect(&mut fetcher(source.clone()).fetch_items(id)).await;

        assert!(matches!(err, Some(FetchError::QuotaExceeded { .. })));
        assert_eq!(source.call_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_quota_exceeded_is_terminal() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(6, 1)).await;

        let fetcher = PlaylistFetcher::new(
            source.clone(),
            Arc::new(RateLimiter::new(
                2,
                Duration::from_secs(100),
                Duration::from_secs(1),
            )),
            PageCache::new(),
        )
        .with_prefetch(false);

        let (got, err) = collect(&mut fetcher.fetch_items(id)).await;

        assert_eq!(got.len(), 2);
        match err {
            Some(FetchError::QuotaExceeded {
                retry_after,
                pages_fetched,
            }) => {
                assert_eq!(pages_fetched, 2);
                assert!(retry_after > Duration::from_secs(1));
            }
            other => panic!("expected quota failure, got {:?}", other),
        }
        assert_eq!(source.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_unavailable_items_skipped() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source
            .add_playlist(
                &id,
                vec![vec![
                    fixtures::item("vid0", "Notation: 5A"),
                    RawItem::new("gone", "Deleted video", "This video is unavailable."),
                    RawItem::new("hidden", "Private video", ""),
                    fixtures::item("vid1", "Notation: 2B"),
                ]],
            )
            .await;

        let mut items = fetcher(source).fetch_items(id);
        let (got, _) = collect(&mut items).await;

        assert_eq!(got.len(), 2);
        assert_eq!(items.unavailable(), &["gone".to_string(), "hidden".to_string()]);
    }

    #[tokio::test]
    async fn test_max_items_stops_pagination() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(10, 3)).await;

        let (got, err) = collect(&mut fetcher(source.clone()).with_max_items(4).fetch_items(id)).await;

        assert!(err.is_none());
        assert_eq!(got.len(), 4);
        assert_eq!(source.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_prefetch_requests_next_page() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(6, 2)).await;

        let fetcher = fetcher(source.clone()).with_prefetch(true);
        let stream = fetcher.fetch_items(id).into_stream();
        let got: Vec<_> = stream.collect().await;

        assert_eq!(got.len(), 6);
        assert!(got.iter().all(Result::is_ok));
        // Prefetch shares the cache, so each page is still requested once.
        assert_eq!(source.call_count().await, 3);
    }

    #[tokio::test]
    async fn test_concurrent_walks_coalesce() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(2, 10)).await;
        let gate = source.hold_requests().await;

        let fetcher = fetcher(source.clone());
        let mut a = fetcher.fetch_items(id.clone());
        let mut b = fetcher.fetch_items(id);

        let first = tokio::spawn(async move { collect(&mut a).await });
        let second = tokio::spawn(async move { collect(&mut b).await });

        // Let both walkers reach the pending page before releasing it.
        while fetcher.cache().stats().coalesced < 1 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(10);

        let (a, _) = first.await.unwrap();
        let (b, _) = second.await.unwrap();
        assert_eq!(a, b);
        assert_eq!(source.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_coalesced_wait_takes_no_permit() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(2, 10)).await;
        let gate = source.hold_requests().await;

        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(100), Duration::ZERO));
        let fetcher = PlaylistFetcher::new(source.clone(), limiter, PageCache::new())
            .with_prefetch(false);
        let mut a = fetcher.fetch_items(id.clone());
        let mut b = fetcher.fetch_items(id);

        let first = tokio::spawn(async move { collect(&mut a).await });
        let second = tokio::spawn(async move { collect(&mut b).await });

        while fetcher.cache().stats().coalesced < 1 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(10);

        let (a, a_err) = first.await.unwrap();
        let (b, b_err) = second.await.unwrap();
        assert!(a_err.is_none(), "unexpected error: {:?}", a_err);
        assert!(b_err.is_none(), "unexpected error: {:?}", b_err);
        assert_eq!(a.len(), 2);
        assert_eq!(a, b);
        assert_eq!(source.call_count().await, 1);
    }

    #[tokio::test]
    async fn test_info_is_cached() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(1, 1)).await;
        let fetcher = fetcher(source.clone());

        let first = fetcher.fetch_info(&id).await.unwrap();
        let second = fetcher.fetch_info(&id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.info_call_count().await, 1);
        assert_eq!(fetcher.info_cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_info_takes_a_permit() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();
        source.add_playlist(&id, fixtures::paged_items(1, 1)).await;
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(100), Duration::ZERO));
        let fetcher = PlaylistFetcher::new(source.clone(), limiter, PageCache::new());

        assert!(fetcher.fetch_info(&id).await.is_ok());
        assert!(matches!(
            fetcher.fetch_page(&id, None).await,
            Err(PageError::QuotaExceeded(_))
        ));
        assert_eq!(source.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_info_failure_is_permanent() {
        let source = Arc::new(MockPlaylistSource::new());
        let id = fixtures::playlist_id();

        let err = fetcher(source.clone()).fetch_info(&id).await.unwrap_err();

        assert!(matches!(err, PageError::Permanent(ref reason) if reason.contains(id.as_str())));
        assert_eq!(source.info_call_count().await, 1);
    }
}
