use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::events::{CatalogEvent, EventBus};
use super::views::{ViewSnapshot, Views};
use crate::config::CatalogConfig;
use crate::error::{CatalogError, Result};
use crate::network::{ConnectivityMonitor, NetworkGate, ReachabilitySubscription};
use crate::remote::{HttpFeed, RemoteFeed};
use crate::state::{PageCursor, PhotoLibrary, PhotoRecord, PhotoStore};
use crate::sync::{MergeSync, PagedCursor, Provenance};

/// Summary of a page that made it into the paged list
#[derive(Debug, Clone)]
pub struct PageSummary {
    pub page: u32,
    pub count: usize,
    pub provenance: Provenance,
    /// Cursor after the page; `None` for direct `fetch_page` calls
    pub cursor: Option<PageCursor>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(PageSummary),
    /// A newer refresh started while this load was in flight; its result was dropped
    Superseded,
    /// The feed has no more pages
    EndOfFeed,
}

/// The catalog as consumers see it.
///
/// Holds the derived views and keeps them consistent with the store after
/// every mutation it initiates. Cheap to clone; every clone drives the same
/// session. Call `dispose` when the session ends.
#[derive(Clone)]
pub struct CatalogController {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn PhotoStore>,
    sync: MergeSync,
    gate: NetworkGate,
    views: Views,
    cursor: Mutex<PagedCursor>,
    page_size: u32,
    /// Bumped by every refresh; loads from older generations are dropped
    generation: AtomicU64,
    /// Only the most recently issued search may publish
    search_seq: AtomicU64,
    toggle_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    subscription: Mutex<Option<ReachabilitySubscription>>,
    online: watch::Sender<bool>,
    loads_in_flight: AtomicUsize,
    loading: watch::Sender<bool>,
    favorites_loading: watch::Sender<bool>,
    events: EventBus,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keeps `loading` true while at least one page load runs
struct LoadingGuard<'a> {
    inner: &'a Inner,
}

impl<'a> LoadingGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        if inner.loads_in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            inner.loading.send_replace(true);
        }
        Self { inner }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.loads_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.loading.send_replace(false);
        }
    }
}

impl CatalogController {
    /// Build a controller over explicitly owned collaborators.
    ///
    /// The reachability subscription is taken first and released again if
    /// any later step fails. The favorites view is loaded before returning.
    pub async fn new(
        store: Arc<dyn PhotoStore>,
        feed: Arc<dyn RemoteFeed>,
        gate: NetworkGate,
        config: &CatalogConfig,
    ) -> Result<Self> {
        let subscription = gate.subscribe();
        let reachable = subscription.is_reachable();
        let receiver = subscription.receiver();

        let sync = MergeSync::new(feed, Arc::clone(&store))
            .with_offline_paging(config.offline_paging);

        let inner = Arc::new(Inner {
            store,
            sync,
            gate,
            views: Views::new(),
            cursor: Mutex::new(PagedCursor::new(config.page_size)),
            page_size: config.page_size,
            generation: AtomicU64::new(0),
            search_seq: AtomicU64::new(0),
            toggle_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            subscription: Mutex::new(Some(subscription)),
            online: watch::channel(reachable).0,
            loads_in_flight: AtomicUsize::new(0),
            loading: watch::channel(false).0,
            favorites_loading: watch::channel(false).0,
            events: EventBus::new(config.event_capacity),
        });

        tokio::spawn(forward_connectivity(
            Arc::downgrade(&inner),
            receiver,
            inner.cancel.clone(),
        ));

        let controller = CatalogController { inner };
        if let Err(err) = controller.refresh_favorites().await {
            tracing::error!(error = %err, "initial favorites load failed");
            controller.dispose();
            return Err(err);
        }

        tracing::info!(reachable, page_size = config.page_size, "🎨 catalog session started");
        Ok(controller)
    }

    /// Controller over the on-disk cache and the HTTP feed named by `config`
    pub async fn open(
        config: &CatalogConfig,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> Result<Self> {
        let store = Arc::new(PhotoLibrary::open(&config.db_path)?);
        let feed = Arc::new(HttpFeed::from_config(config));
        Self::new(store, feed, NetworkGate::new(monitor), config).await
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            Err(CatalogError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Run `fut` unless the controller is disposed first
    async fn guarded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(CatalogError::Disposed),
            result = fut => result,
        }
    }

    /// Emit a connectivity notice when the gate says we are offline.
    /// Never blocks the fetch: the signal can lag behind reality.
    fn advise_connectivity(&self) {
        if !self.inner.gate.is_reachable_now() {
            tracing::warn!("no connectivity reported, attempting fetch anyway");
            self.inner.events.emit(CatalogEvent::ConnectivityAdvisory);
        }
    }

    /// Fetch one page and make it the paged list.
    pub async fn fetch_page(&self, page: u32) -> Result<LoadOutcome> {
        self.ensure_live()?;
        self.advise_connectivity();

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let synced = {
            let _loading = LoadingGuard::new(&self.inner);
            self.guarded(self.inner.sync.sync_page(page, self.inner.page_size))
                .await?
        };
        self.ensure_live()?;

        let applied = self.inner.views.update(|state| {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            state.replace_all(synced.records.clone());
            true
        });
        if !applied {
            self.inner.events.emit(CatalogEvent::LoadSuperseded { page });
            return Ok(LoadOutcome::Superseded);
        }

        Ok(LoadOutcome::Loaded(self.page_loaded(
            page,
            &synced.records,
            synced.provenance,
            None,
            synced.synced_at,
        )))
    }

    /// Load the page after the last one and append it to the paged list.
    pub async fn load_next_page(&self) -> Result<LoadOutcome> {
        self.ensure_live()?;

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let next_key = self.lock_cursor().next_key_to_load();
        let Some(key) = next_key else {
            return Ok(LoadOutcome::EndOfFeed);
        };
        self.advise_connectivity();

        let synced = {
            let _loading = LoadingGuard::new(&self.inner);
            self.guarded(self.inner.sync.sync_page(key, self.inner.page_size))
                .await?
        };
        self.ensure_live()?;

        // Generation check, cursor advance and append happen under the view lock
        let cursor = self.inner.views.update(|state| {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return None;
            }
            let cursor = self.lock_cursor().advance(key, &synced.records);
            state.append_page(synced.records.clone());
            Some(cursor)
        });
        let Some(cursor) = cursor else {
            tracing::debug!(page = key, "dropping page from superseded load");
            self.inner.events.emit(CatalogEvent::LoadSuperseded { page: key });
            return Ok(LoadOutcome::Superseded);
        };

        Ok(LoadOutcome::Loaded(self.page_loaded(
            key,
            &synced.records,
            synced.provenance,
            Some(cursor),
            synced.synced_at,
        )))
    }

    /// Drop every loaded page and start over from page 1.
    ///
    /// Loads still in flight from before the refresh are discarded when
    /// they complete. The last refresh issued wins.
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        self.ensure_live()?;

        let generation = self.inner.views.update(|state| {
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.lock_cursor().refresh();
            state.clear_pages();
            generation
        });
        tracing::info!(generation, "🔄 refreshing photo list");
        self.inner.events.emit(CatalogEvent::Refreshed { generation });

        self.load_next_page().await
    }

    /// Flip the favorite flag of `id`; returns the new value.
    pub async fn toggle_favorite(&self, id: &str) -> Result<bool> {
        self.ensure_live()?;
        let _serialized = self
            .guarded(async { Ok(self.inner.toggle_lock.lock().await) })
            .await?;

        let current = self
            .guarded(self.inner.store.get(id))
            .await?
            .ok_or_else(|| CatalogError::not_found(id))?;
        let is_favorite = !current.is_favorite;

        self.guarded(self.inner.store.set_favorite(id, is_favorite))
            .await?;
        let favorites = self.guarded(self.inner.store.favorites_only()).await?;
        self.ensure_live()?;

        self.inner.views.update(|state| {
            state.set_favorites(favorites);
            state.patch_favorite(id, is_favorite);
        });

        tracing::info!(id, is_favorite, "⭐ favorite toggled");
        self.inner.events.emit(CatalogEvent::FavoriteToggled {
            id: id.to_string(),
            is_favorite,
        });
        Ok(is_favorite)
    }

    /// Replace the search results with the matches for `query`.
    ///
    /// An empty query clears the results without reading the store.
    pub async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>> {
        self.ensure_live()?;
        let seq = self.inner.search_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let results = if query.is_empty() {
            Vec::new()
        } else {
            self.guarded(self.inner.store.search(query)).await?
        };
        self.ensure_live()?;

        Ok(self.inner.views.update(|state| {
            if self.inner.search_seq.load(Ordering::SeqCst) == seq {
                state.set_search_results(results);
                state.search_results().to_vec()
            } else {
                tracing::debug!(query, "dropping results of an older search");
                results
            }
        }))
    }

    /// Reload the favorites view from the store.
    ///
    /// Holds the toggle lock from the read until the views are updated, so a
    /// snapshot never lands on top of a newer toggle.
    pub async fn refresh_favorites(&self) -> Result<Vec<PhotoRecord>> {
        self.ensure_live()?;
        let _serialized = self
            .guarded(async { Ok(self.inner.toggle_lock.lock().await) })
            .await?;
        self.inner.favorites_loading.send_replace(true);
        let favorites = self.guarded(self.inner.store.favorites_only()).await;
        self.inner.favorites_loading.send_replace(false);
        let favorites = favorites?;
        self.ensure_live()?;

        tracing::debug!(count = favorites.len(), "favorites loaded");
        Ok(self.inner.views.update(|state| {
            state.set_favorites(favorites);
            state.favorites().to_vec()
        }))
    }

    /// O(1) check against the in-memory favorite set
    pub fn current_favorite_state(&self, id: &str) -> bool {
        self.inner.views.read(|state| state.is_favorite(id))
    }

    pub fn all_photos(&self) -> Vec<PhotoRecord> {
        self.inner.views.read(|state| state.all_photos().to_vec())
    }

    pub fn favorites(&self) -> Vec<PhotoRecord> {
        self.inner.views.read(|state| state.favorites().to_vec())
    }

    pub fn search_results(&self) -> Vec<PhotoRecord> {
        self.inner.views.read(|state| state.search_results().to_vec())
    }

    pub fn watch_all_photos(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.views.subscribe_all_photos()
    }

    pub fn watch_favorites(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.views.subscribe_favorites()
    }

    pub fn watch_search_results(&self) -> watch::Receiver<ViewSnapshot> {
        self.inner.views.subscribe_search_results()
    }

    /// Last reachability value seen by the subscription
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    pub fn watch_online(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.inner.loading.borrow()
    }

    pub fn watch_loading(&self) -> watch::Receiver<bool> {
        self.inner.loading.subscribe()
    }

    pub fn is_favorites_loading(&self) -> bool {
        *self.inner.favorites_loading.borrow()
    }

    pub fn cursor(&self) -> PageCursor {
        self.lock_cursor().state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CatalogEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// End the session: abandon in-flight work and release the
    /// reachability subscription. Safe to call more than once.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();

        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        self.inner.events.emit(CatalogEvent::Disposed);
        tracing::info!("catalog session disposed");
    }

    fn lock_cursor(&self) -> std::sync::MutexGuard<'_, PagedCursor> {
        self.inner
            .cursor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn page_loaded(
        &self,
        page: u32,
        records: &[PhotoRecord],
        provenance: Provenance,
        cursor: Option<PageCursor>,
        synced_at: DateTime<Utc>,
    ) -> PageSummary {
        let count = records.len();
        tracing::debug!(page, count, live = provenance.is_live(), "page applied to views");
        self.inner.events.emit(CatalogEvent::PageLoaded {
            page,
            count,
            provenance: provenance.clone(),
        });
        PageSummary {
            page,
            count,
            provenance,
            cursor,
            synced_at,
        }
    }
}

impl std::fmt::Debug for CatalogController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogController")
            .field("cursor", &self.cursor())
            .field("online", &self.is_online())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Mirror the reachability subscription into the controller until disposal
async fn forward_connectivity(
    inner: Weak<Inner>,
    mut receiver: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = receiver.changed() => {
                if changed.is_err() {
                    break;
                }
                let reachable = *receiver.borrow_and_update();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if reachable {
                    tracing::info!("🌐 back online");
                } else {
                    tracing::warn!("📴 offline, cached photos will be served");
                }
                inner.online.send_replace(reachable);
                inner.events.emit(CatalogEvent::ConnectivityChanged { reachable });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OfflinePaging;
    use crate::network::ManualMonitor;
    use crate::sync::merge::tests::{photo, BrokenStore, FakeFeed};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Harness {
        controller: CatalogController,
        store: Arc<PhotoLibrary>,
        feed: Arc<FakeFeed>,
        monitor: Arc<ManualMonitor>,
    }

    fn config(page_size: u32) -> CatalogConfig {
        CatalogConfig {
            page_size,
            ..CatalogConfig::default()
        }
    }

    async fn harness(feed: FakeFeed, page_size: u32) -> Harness {
        let store = Arc::new(PhotoLibrary::open_in_memory().unwrap());
        let feed = Arc::new(feed);
        let monitor = Arc::new(ManualMonitor::reachable(true));
        let controller = CatalogController::new(
            store.clone(),
            feed.clone(),
            NetworkGate::new(monitor.clone()),
            &config(page_size),
        )
        .await
        .unwrap();

        Harness {
            controller,
            store,
            feed,
            monitor,
        }
    }

    fn ids(photos: &[PhotoRecord]) -> Vec<&str> {
        photos.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_fetch_then_toggle_favorite() {
        let h = harness(FakeFeed::default().with_page(1, vec![photo("1", "Alice")]), 100).await;

        h.controller.fetch_page(1).await.unwrap();
        let stored = h.store.get("1").await.unwrap().unwrap();
        assert!(!stored.is_favorite);

        assert!(h.controller.toggle_favorite("1").await.unwrap());
        assert_eq!(ids(&h.controller.favorites()), vec!["1"]);
        assert!(h.controller.current_favorite_state("1"));
        assert!(h.controller.all_photos()[0].is_favorite);
    }

    #[tokio::test]
    async fn test_refetch_keeps_favorite_in_views() {
        let h = harness(FakeFeed::default().with_page(1, vec![photo("2", "Bob")]), 100).await;
        h.controller.fetch_page(1).await.unwrap();
        h.controller.toggle_favorite("2").await.unwrap();

        h.controller.fetch_page(1).await.unwrap();

        assert!(h.store.get("2").await.unwrap().unwrap().is_favorite);
        assert!(h.controller.all_photos()[0].is_favorite);
        assert_eq!(ids(&h.controller.favorites()), vec!["2"]);
    }

    #[tokio::test]
    async fn test_toggle_keeps_all_views_consistent() {
        let h = harness(
            FakeFeed::default().with_page(
                1,
                vec![photo("1", "Alice"), photo("2", "Alicia"), photo("3", "Bob")],
            ),
            100,
        )
        .await;
        h.controller.fetch_page(1).await.unwrap();
        h.controller.search("ali").await.unwrap();

        for expected in [true, false, true] {
            let now = h.controller.toggle_favorite("2").await.unwrap();
            assert_eq!(now, expected);

            let in_favorites = h.controller.favorites().iter().any(|p| p.id == "2");
            assert_eq!(in_favorites, expected);
            let listed = h.controller.all_photos().into_iter().find(|p| p.id == "2").unwrap();
            assert_eq!(listed.is_favorite, expected);
            let found = h.controller.search_results().into_iter().find(|p| p.id == "2").unwrap();
            assert_eq!(found.is_favorite, expected);
            assert_eq!(h.controller.current_favorite_state("2"), expected);
        }
    }

    #[tokio::test]
    async fn test_toggle_unknown_id_is_not_found() {
        let h = harness(FakeFeed::default(), 100).await;
        let err = h.controller.toggle_favorite("nope").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_lose_updates() {
        let h = harness(FakeFeed::default().with_page(1, vec![photo("1", "A")]), 100).await;
        h.controller.fetch_page(1).await.unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let controller = h.controller.clone();
                tokio::spawn(async move { controller.toggle_favorite("1").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        // Four flips bring the flag back to where it started
        assert!(!h.store.get("1").await.unwrap().unwrap().is_favorite);
        assert!(h.controller.favorites().is_empty());
        assert!(!h.controller.current_favorite_state("1"));
    }

    #[tokio::test]
    async fn test_empty_and_unmatched_search() {
        let h = harness(FakeFeed::default().with_page(1, vec![photo("1", "Alice")]), 100).await;
        h.controller.fetch_page(1).await.unwrap();

        assert!(h.controller.search("zz-no-match").await.unwrap().is_empty());
        h.controller.search("alice").await.unwrap();
        assert_eq!(h.controller.search_results().len(), 1);

        assert!(h.controller.search("").await.unwrap().is_empty());
        assert!(h.controller.search_results().is_empty());
    }

    #[tokio::test]
    async fn test_offline_fetch_serves_cache_with_advisory() {
        let h = harness(FakeFeed::offline(), 100).await;
        h.store
            .upsert_all(&[photo("1", "A"), photo("2", "B"), photo("3", "C")])
            .await
            .unwrap();
        h.monitor.set_reachable(false);
        let mut events = h.controller.subscribe_events();

        let outcome = h.controller.fetch_page(1).await.unwrap();
        let LoadOutcome::Loaded(summary) = outcome else {
            panic!("expected a loaded page");
        };
        assert_eq!(summary.count, 3);
        assert!(!summary.provenance.is_live());
        assert_eq!(h.controller.all_photos().len(), 3);
        assert_eq!(h.store.count().await.unwrap(), 3);

        let mut saw_advisory = false;
        while let Ok(event) = events.try_recv() {
            saw_advisory |= event == CatalogEvent::ConnectivityAdvisory;
        }
        assert!(saw_advisory);
    }

    #[tokio::test]
    async fn test_paging_appends_and_terminates() {
        let feed = FakeFeed::default()
            .with_page(1, vec![photo("1", "A"), photo("2", "B")])
            .with_page(2, vec![photo("3", "C")]);
        let h = harness(feed, 2).await;

        assert!(matches!(h.controller.load_next_page().await.unwrap(), LoadOutcome::Loaded(_)));
        assert!(matches!(h.controller.load_next_page().await.unwrap(), LoadOutcome::Loaded(_)));
        let LoadOutcome::Loaded(last) = h.controller.load_next_page().await.unwrap() else {
            panic!("expected the empty terminal page");
        };
        assert_eq!(last.count, 0);
        assert_eq!(last.cursor.unwrap().next_key, None);

        assert!(matches!(h.controller.load_next_page().await.unwrap(), LoadOutcome::EndOfFeed));
        assert_eq!(ids(&h.controller.all_photos()), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_refresh_clears_and_reloads() {
        let feed = FakeFeed::default().with_page(1, vec![photo("1", "A")]);
        let h = harness(feed, 1).await;
        h.controller.load_next_page().await.unwrap();
        h.controller.load_next_page().await.unwrap();

        h.feed.set_page(1, vec![photo("9", "Z")]);
        h.controller.refresh().await.unwrap();

        assert_eq!(ids(&h.controller.all_photos()), vec!["9"]);
        assert_eq!(h.controller.cursor().current_key, Some(1));
    }

    /// Feed whose calls park until their gate is opened, in call order
    #[derive(Default)]
    struct GatedFeed {
        gates: Mutex<std::collections::VecDeque<(Arc<Notify>, Vec<PhotoRecord>)>>,
    }

    impl GatedFeed {
        fn push(&self, records: Vec<PhotoRecord>) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates.lock().unwrap().push_back((gate.clone(), records));
            gate
        }
    }

    #[async_trait]
    impl RemoteFeed for GatedFeed {
        async fn fetch_page(
            &self,
            _page: u32,
            _size: u32,
        ) -> std::result::Result<Vec<PhotoRecord>, crate::error::NetworkError> {
            let next = self.gates.lock().unwrap().pop_front();
            match next {
                Some((gate, records)) => {
                    gate.notified().await;
                    Ok(records)
                }
                None => Ok(Vec::new()),
            }
        }
    }

    /// Library that starts failing once `break_now` is called
    struct FlakyStore {
        library: PhotoLibrary,
        broken: std::sync::atomic::AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                Err(CatalogError::storage("flaky", "disk I/O error"))
            } else {
                Ok(())
            }
        }

        fn break_now(&self) {
            self.broken.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PhotoStore for FlakyStore {
        async fn upsert_all(&self, records: &[PhotoRecord]) -> Result<()> {
            self.check()?;
            self.library.upsert_all(records).await
        }
        async fn all(&self) -> Result<Vec<PhotoRecord>> {
            self.check()?;
            self.library.all().await
        }
        async fn favorites_only(&self) -> Result<Vec<PhotoRecord>> {
            self.check()?;
            self.library.favorites_only().await
        }
        async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>> {
            self.check()?;
            self.library.search(query).await
        }
        async fn set_favorite(&self, id: &str, value: bool) -> Result<()> {
            self.check()?;
            self.library.set_favorite(id, value).await
        }
        async fn get(&self, id: &str) -> Result<Option<PhotoRecord>> {
            self.check()?;
            self.library.get(id).await
        }
        async fn count(&self) -> Result<usize> {
            self.check()?;
            self.library.count().await
        }
    }

    /// Library whose next `favorites_only` parks after reading until released
    struct PausingStore {
        library: PhotoLibrary,
        pause: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    }

    impl PausingStore {
        /// Returns (entered, release) for the next favorites read
        fn pause_next_favorites_read(&self) -> (Arc<Notify>, Arc<Notify>) {
            let entered = Arc::new(Notify::new());
            let release = Arc::new(Notify::new());
            *self.pause.lock().unwrap() = Some((entered.clone(), release.clone()));
            (entered, release)
        }
    }

    #[async_trait]
    impl PhotoStore for PausingStore {
        async fn upsert_all(&self, records: &[PhotoRecord]) -> Result<()> {
            self.library.upsert_all(records).await
        }
        async fn all(&self) -> Result<Vec<PhotoRecord>> {
            self.library.all().await
        }
        async fn favorites_only(&self) -> Result<Vec<PhotoRecord>> {
            let favorites = self.library.favorites_only().await?;
            let pause = self.pause.lock().unwrap().take();
            if let Some((entered, release)) = pause {
                entered.notify_one();
                release.notified().await;
            }
            Ok(favorites)
        }
        async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>> {
            self.library.search(query).await
        }
        async fn set_favorite(&self, id: &str, value: bool) -> Result<()> {
            self.library.set_favorite(id, value).await
        }
        async fn get(&self, id: &str) -> Result<Option<PhotoRecord>> {
            self.library.get(id).await
        }
        async fn count(&self) -> Result<usize> {
            self.library.count().await
        }
    }

    #[tokio::test]
    async fn test_favorites_reload_cannot_undo_a_later_toggle() {
        let store = Arc::new(PausingStore {
            library: PhotoLibrary::open_in_memory().unwrap(),
            pause: Mutex::new(None),
        });
        let controller = CatalogController::new(
            store.clone(),
            Arc::new(FakeFeed::default().with_page(1, vec![photo("1", "A")])),
            NetworkGate::new(Arc::new(ManualMonitor::reachable(true))),
            &config(10),
        )
        .await
        .unwrap();
        controller.fetch_page(1).await.unwrap();

        let (entered, release) = store.pause_next_favorites_read();
        let reload = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh_favorites().await }
        });
        entered.notified().await;

        // The reload holds an empty snapshot while the toggle is issued
        let toggle = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle_favorite("1").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        release.notify_one();

        reload.await.unwrap().unwrap();
        assert!(toggle.await.unwrap().unwrap());

        assert!(store.get("1").await.unwrap().unwrap().is_favorite);
        assert_eq!(ids(&controller.favorites()), vec!["1"]);
        assert!(controller.current_favorite_state("1"));
        assert!(controller.all_photos()[0].is_favorite);
    }

    #[tokio::test]
    async fn test_late_duplicate_load_does_not_rewind_cursor() {
        let store = Arc::new(PhotoLibrary::open_in_memory().unwrap());
        let feed = Arc::new(GatedFeed::default());
        let first = feed.push(vec![photo("1", "A")]);
        let duplicate = feed.push(vec![photo("1", "A")]);
        let controller = CatalogController::new(
            store,
            feed.clone(),
            NetworkGate::new(Arc::new(ManualMonitor::reachable(true))),
            &config(1),
        )
        .await
        .unwrap();

        // Both loads read page 1 before either completes
        let early = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_next_page().await }
        });
        let late = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_next_page().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.notify_one();
        early.await.unwrap().unwrap();
        let second = feed.push(vec![photo("2", "B")]);
        second.notify_one();
        controller.load_next_page().await.unwrap();
        assert_eq!(controller.cursor().next_key, Some(3));

        duplicate.notify_one();
        late.await.unwrap().unwrap();
        assert_eq!(controller.cursor().current_key, Some(2));
        assert_eq!(controller.cursor().next_key, Some(3));
        assert_eq!(ids(&controller.all_photos()), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_refresh_supersedes_in_flight_load() {
        let store = Arc::new(PhotoLibrary::open_in_memory().unwrap());
        let feed = Arc::new(GatedFeed::default());
        let stale_gate = feed.push(vec![photo("old", "A")]);
        let fresh_gate = feed.push(vec![photo("new", "B")]);
        let controller = CatalogController::new(
            store,
            feed.clone(),
            NetworkGate::new(Arc::new(ManualMonitor::reachable(true))),
            &config(10),
        )
        .await
        .unwrap();

        let stale = tokio::spawn({
            let controller = controller.clone();
            async move { controller.fetch_page(1).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Bump the generation while the fetch above is parked
        let refreshing = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        fresh_gate.notify_one();
        assert!(matches!(refreshing.await.unwrap().unwrap(), LoadOutcome::Loaded(_)));

        stale_gate.notify_one();
        assert!(matches!(stale.await.unwrap().unwrap(), LoadOutcome::Superseded));
        assert_eq!(ids(&controller.all_photos()), vec!["new"]);
    }

    #[tokio::test]
    async fn test_dispose_abandons_in_flight_load() {
        let store = Arc::new(PhotoLibrary::open_in_memory().unwrap());
        let feed = Arc::new(GatedFeed::default());
        let _never_opened = feed.push(vec![photo("1", "A")]);
        let monitor = Arc::new(ManualMonitor::reachable(true));
        let controller =
            CatalogController::new(store, feed, NetworkGate::new(monitor.clone()), &config(10))
                .await
                .unwrap();
        assert_eq!(monitor.listener_count(), 1);

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.load_next_page().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        controller.dispose();
        controller.dispose();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(CatalogError::Disposed)));
        assert!(controller.all_photos().is_empty());
        assert_eq!(monitor.listener_count(), 0);
        assert!(matches!(controller.search("a").await, Err(CatalogError::Disposed)));
    }

    #[tokio::test]
    async fn test_failed_construction_releases_subscription() {
        let monitor = Arc::new(ManualMonitor::reachable(true));
        let result = CatalogController::new(
            Arc::new(BrokenStore),
            Arc::new(FakeFeed::default()),
            NetworkGate::new(monitor.clone()),
            &config(10),
        )
        .await;

        assert!(result.unwrap_err().is_storage());
        assert_eq!(monitor.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_from_every_path() {
        let store = Arc::new(FlakyStore {
            library: PhotoLibrary::open_in_memory().unwrap(),
            broken: Default::default(),
        });
        let feed = Arc::new(FakeFeed::default().with_page(1, vec![photo("1", "A")]));
        let controller = CatalogController::new(
            store.clone(),
            feed.clone(),
            NetworkGate::new(Arc::new(ManualMonitor::reachable(true))),
            &config(10),
        )
        .await
        .unwrap();
        controller.fetch_page(1).await.unwrap();

        store.break_now();
        assert!(controller.fetch_page(1).await.unwrap_err().is_storage());
        assert!(controller.toggle_favorite("1").await.unwrap_err().is_storage());
        assert!(controller.search("a").await.unwrap_err().is_storage());

        // Offline fallback does not hide a broken cache either
        feed.set_offline(true);
        assert!(controller.load_next_page().await.unwrap_err().is_storage());

        // Views keep the last good state
        assert_eq!(ids(&controller.all_photos()), vec!["1"]);
    }

    #[tokio::test]
    async fn test_connectivity_changes_are_mirrored() {
        let h = harness(FakeFeed::default(), 100).await;
        assert!(h.controller.is_online());

        let mut online = h.controller.watch_online();
        h.monitor.set_reachable(false);
        tokio::time::timeout(Duration::from_secs(1), online.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!h.controller.is_online());
    }

    #[tokio::test]
    async fn test_views_publish_to_watchers() {
        let h = harness(FakeFeed::default().with_page(1, vec![photo("1", "A")]), 100).await;
        let mut favorites = h.controller.watch_favorites();
        let all = h.controller.watch_all_photos();

        h.controller.fetch_page(1).await.unwrap();
        assert_eq!(all.borrow().len(), 1);

        h.controller.toggle_favorite("1").await.unwrap();
        assert!(favorites.has_changed().unwrap());
        assert_eq!(ids(&favorites.borrow_and_update()), vec!["1"]);
        assert!(!h.controller.is_loading());
    }

    #[tokio::test]
    async fn test_whole_cache_offline_mode_through_controller() {
        let store = Arc::new(PhotoLibrary::open_in_memory().unwrap());
        store
            .upsert_all(&[photo("1", "A"), photo("2", "B")])
            .await
            .unwrap();
        let controller = CatalogController::new(
            store,
            Arc::new(FakeFeed::offline()),
            NetworkGate::new(Arc::new(ManualMonitor::reachable(false))),
            &CatalogConfig {
                page_size: 1,
                offline_paging: OfflinePaging::WholeCache,
                ..CatalogConfig::default()
            },
        )
        .await
        .unwrap();

        controller.load_next_page().await.unwrap();
        controller.load_next_page().await.unwrap();
        // Same two records every page, listed once
        assert_eq!(ids(&controller.all_photos()), vec!["1", "2"]);
        assert_eq!(controller.cursor().next_key, Some(3));
    }
}
