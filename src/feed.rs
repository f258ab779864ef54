//! Incremental feed loading.
//!
//! [`FeedStore`] is the append-only list the view renders. [`IncrementalLoader`]
//! is the single-flight state machine that decides when the next page may be
//! requested and which cursor it carries. [`FeedSession`] runs the loader
//! against a [`FeedService`], fetching on a worker thread and applying results
//! when the owner drains the completion channel.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::data::{FeedService, FetchError};
use crate::reddit::{Post, SortOption};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_LOAD_THRESHOLD: f64 = 36.0;

/// Anything that can hand out the cursor for the page that follows it.
pub trait FeedItem {
    fn cursor(&self) -> &str;
}

impl FeedItem for Post {
    fn cursor(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedStore<T> {
    items: Vec<T>,
}

impl<T> Default for FeedStore<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> FeedStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<I>(&mut self, batch: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.extend(batch);
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Loading { request_id: u64 },
}

/// Scroll position report from the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSignal {
    pub offset: f64,
    pub max_offset: f64,
    pub is_intermediate: bool,
}

impl ScrollSignal {
    pub fn new(offset: f64, max_offset: f64, is_intermediate: bool) -> Self {
        Self {
            offset,
            max_offset,
            is_intermediate,
        }
    }

    pub fn remaining(&self) -> f64 {
        self.max_offset - self.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityPolicy {
    pub threshold: f64,
    pub ignore_intermediate: bool,
}

impl Default for ProximityPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOAD_THRESHOLD,
            ignore_intermediate: false,
        }
    }
}

impl ProximityPolicy {
    pub fn is_near_end(&self, signal: ScrollSignal) -> bool {
        signal.remaining() < self.threshold
    }

    pub fn wants_load(&self, signal: ScrollSignal) -> bool {
        if self.ignore_intermediate && signal.is_intermediate {
            return false;
        }
        self.is_near_end(signal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub request_id: u64,
    pub collection: String,
    pub sort: SortOption,
    pub after: Option<String>,
    pub limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A page arrived and this many items were appended.
    Appended(usize),
    /// The source returned an empty page; proximity loads stop until a reload.
    Exhausted,
    /// A reload arrived while this page was in flight. Its result was dropped
    /// and the fresh first page may now be requested.
    Superseded,
    /// The completion did not belong to the current request.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedOptions {
    pub collection: String,
    pub sort: SortOption,
    pub page_size: u32,
    pub policy: ProximityPolicy,
}

impl FeedOptions {
    pub fn new(collection: impl Into<String>, sort: SortOption) -> Self {
        Self {
            collection: collection.into(),
            sort,
            page_size: DEFAULT_PAGE_SIZE,
            policy: ProximityPolicy::default(),
        }
    }
}

pub struct IncrementalLoader<T> {
    store: FeedStore<T>,
    state: LoaderState,
    options: FeedOptions,
    exhausted: bool,
    reload_pending: bool,
    next_request_id: u64,
}

impl<T: FeedItem> IncrementalLoader<T> {
    pub fn new(options: FeedOptions) -> Self {
        Self {
            store: FeedStore::new(),
            state: LoaderState::Idle,
            options,
            exhausted: false,
            reload_pending: false,
            next_request_id: 1,
        }
    }

    pub fn store(&self) -> &FeedStore<T> {
        &self.store
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn options(&self) -> &FeedOptions {
        &self.options
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoaderState::Loading { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True while a reload waits for the in-flight request to finish.
    pub fn is_reload_pending(&self) -> bool {
        self.reload_pending
    }

    /// Moves `Idle -> Loading` and returns the request to issue. Returns `None`
    /// while another request is in flight.
    pub fn begin_load(&mut self) -> Option<PageRequest> {
        if let LoaderState::Loading { request_id } = self.state {
            log::debug!("feed: load dropped, request {request_id} still in flight");
            return None;
        }
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let after = self.store.last().map(|item| item.cursor().to_string());
        self.state = LoaderState::Loading { request_id };
        log::debug!(
            "feed: request {request_id} for {} ({}) after {:?}",
            self.options.collection,
            self.options.sort.as_str(),
            after
        );
        Some(PageRequest {
            request_id,
            collection: self.options.collection.clone(),
            sort: self.options.sort,
            after,
            limit: self.options.page_size,
        })
    }

    /// Scroll-driven load. Only continues a feed that already has a first page.
    pub fn on_near_end(&mut self, signal: ScrollSignal) -> Option<PageRequest> {
        if self.store.is_empty() || self.exhausted || self.is_loading() {
            return None;
        }
        if !self.options.policy.wants_load(signal) {
            return None;
        }
        self.begin_load()
    }

    /// Applies the result of `request_id`. Any completion of the current
    /// request returns the loader to `Idle`, including failures.
    pub fn complete(
        &mut self,
        request_id: u64,
        result: Result<Vec<T>, FetchError>,
    ) -> Result<LoadOutcome, FetchError> {
        if self.state != (LoaderState::Loading { request_id }) {
            log::debug!("feed: ignoring stale completion for request {request_id}");
            return Ok(LoadOutcome::Stale);
        }
        self.state = LoaderState::Idle;
        if self.reload_pending {
            self.reload_pending = false;
            log::debug!("feed: request {request_id} superseded by reload");
            return Ok(LoadOutcome::Superseded);
        }
        let items = result.map_err(|err| {
            log::warn!("feed: request {request_id} failed: {err}");
            err
        })?;
        if items.is_empty() {
            self.exhausted = true;
            log::info!("feed: {} reached its end", self.options.collection);
            return Ok(LoadOutcome::Exhausted);
        }
        let count = items.len();
        self.store.append(items);
        log::debug!(
            "feed: request {request_id} appended {count}, {} total",
            self.store.len()
        );
        Ok(LoadOutcome::Appended(count))
    }

    /// Issues, fetches and applies one page on the calling thread.
    pub fn load_next_with<F>(&mut self, fetch: F) -> Option<Result<LoadOutcome, FetchError>>
    where
        F: FnOnce(&PageRequest) -> Result<Vec<T>, FetchError>,
    {
        let request = self.begin_load()?;
        let result = fetch(&request);
        Some(self.complete(request.request_id, result))
    }

    /// Empties the store for a fresh first page. An in-flight request keeps
    /// the loader `Loading` until it completes; its result is then dropped.
    pub fn reset(&mut self, sort: Option<SortOption>) {
        if let Some(sort) = sort {
            self.options.sort = sort;
        }
        self.store.clear();
        self.exhausted = false;
        self.reload_pending = self.is_loading();
    }
}

struct PageResult {
    request_id: u64,
    result: Result<Vec<Post>, FetchError>,
}

/// A loader bound to a feed service. Fetches run on worker threads; their
/// results are applied by [`FeedSession::poll`] or [`FeedSession::wait`].
pub struct FeedSession {
    loader: IncrementalLoader<Post>,
    source: Arc<dyn FeedService>,
    tx: Sender<PageResult>,
    rx: Receiver<PageResult>,
}

impl FeedSession {
    pub fn new(source: Arc<dyn FeedService>, options: FeedOptions) -> Self {
        let (tx, rx) = unbounded();
        Self {
            loader: IncrementalLoader::new(options),
            source,
            tx,
            rx,
        }
    }

    pub fn posts(&self) -> &[Post] {
        self.loader.store().items()
    }

    pub fn loader(&self) -> &IncrementalLoader<Post> {
        &self.loader
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn is_exhausted(&self) -> bool {
        self.loader.is_exhausted()
    }

    pub fn sort(&self) -> SortOption {
        self.loader.options().sort
    }

    /// Starts the next page fetch. Returns false when one is already running.
    pub fn load_next(&mut self) -> bool {
        match self.loader.begin_load() {
            Some(request) => {
                self.spawn(request);
                true
            }
            None => false,
        }
    }

    pub fn on_near_end(&mut self, signal: ScrollSignal) -> bool {
        match self.loader.on_near_end(signal) {
            Some(request) => {
                self.spawn(request);
                true
            }
            None => false,
        }
    }

    /// Drops everything loaded so far and requests the first page again.
    /// With a fetch in flight the first page is issued once that fetch
    /// completes. Returns true when a first page is on its way.
    pub fn reload(&mut self, sort: Option<SortOption>) -> bool {
        self.loader.reset(sort);
        self.loader.is_reload_pending() || self.load_next()
    }

    /// Applies every completion that has already arrived.
    pub fn poll(&mut self) -> Vec<Result<LoadOutcome, FetchError>> {
        let mut outcomes = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            outcomes.push(self.apply(message));
        }
        outcomes
    }

    /// Blocks until the next completion arrives or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> Option<Result<LoadOutcome, FetchError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(self.apply(message)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn apply(&mut self, message: PageResult) -> Result<LoadOutcome, FetchError> {
        let outcome = self.loader.complete(message.request_id, message.result);
        if matches!(outcome, Ok(LoadOutcome::Superseded)) {
            self.load_next();
        }
        outcome
    }

    fn spawn(&self, request: PageRequest) {
        let tx = self.tx.clone();
        let source = self.source.clone();
        thread::spawn(move || {
            let result = source.fetch_page(
                &request.collection,
                request.sort,
                request.after.as_deref(),
                request.limit,
            );
            let _ = tx.send(PageResult {
                request_id: request.request_id,
                result,
            });
        });
    }
}
