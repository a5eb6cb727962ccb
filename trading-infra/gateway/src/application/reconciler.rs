//! Order book reconciliation
//!
//! Turns a stream of deltas plus an occasionally fetched snapshot into a
//! continuously consistent book per symbol. Deltas that arrive before the
//! book is primed are buffered and replayed once a snapshot lands.

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::registry::SubscriptionRegistry;
use crate::domain::{
    BookDelta, BookSnapshot, BookState, FetchError, MarketEvent, OrderBook, OrderBookSnapshot,
    QualifiedSymbol, SequenceCheck, SnapshotFetcher, StreamKey, Topic, VenueId, check_sequence,
};
use crate::error::StreamError;

/// Per-venue order book settings
#[derive(Debug, Clone, PartialEq)]
pub struct BookSettings {
    /// Deltas kept while waiting for a snapshot; the oldest are dropped first
    pub max_buffer_size: usize,
    /// Levels kept per side after each update
    pub max_depth: Option<usize>,
    /// Depth requested from the snapshot endpoint
    pub snapshot_depth: usize,
}

impl Default for BookSettings {
    fn default() -> Self {
        BookSettings {
            max_buffer_size: 1000,
            max_depth: None,
            snapshot_depth: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DeltaOutcome {
    Applied(Arc<OrderBookSnapshot>),
    Buffered,
    /// First delta of an unprimed book; a snapshot must be fetched
    NeedsSnapshot,
    Stale,
    Gap { expected: u64, received: u64 },
}

#[derive(Debug, Clone, PartialEq)]
enum PrimeOutcome {
    Primed(Arc<OrderBookSnapshot>),
    /// Snapshot belongs to an abandoned priming attempt
    Ignored,
    Gap { expected: u64, received: u64 },
}

/// Sync state machine for one symbol
struct SymbolBook {
    venue: VenueId,
    symbol: String,
    state: BookState,
    book: OrderBook,
    buffer: VecDeque<BookDelta>,
    max_buffer: usize,
    /// Bumped whenever a priming attempt starts or is abandoned
    generation: u64,
    can_fetch: bool,
}

impl SymbolBook {
    fn new(key: &QualifiedSymbol, settings: &BookSettings, can_fetch: bool) -> Self {
        SymbolBook {
            venue: key.venue.clone(),
            symbol: key.symbol.clone(),
            state: BookState::Unprimed,
            book: OrderBook::new(settings.max_depth),
            buffer: VecDeque::new(),
            max_buffer: settings.max_buffer_size.max(1),
            generation: 0,
            can_fetch,
        }
    }

    fn push_buffer(&mut self, delta: BookDelta) {
        if self.buffer.len() >= self.max_buffer {
            self.buffer.pop_front();
            tracing::warn!("{}:{} buffer full, dropping oldest update", self.venue, self.symbol);
        }
        self.buffer.push_back(delta);
    }

    fn snapshot(&self) -> Arc<OrderBookSnapshot> {
        Arc::new(self.book.snapshot(&self.venue, &self.symbol))
    }

    fn on_delta(&mut self, delta: BookDelta) -> DeltaOutcome {
        match self.state {
            BookState::Primed => {
                let current = self.book.sequence().unwrap_or(0);
                match check_sequence(current, &delta) {
                    SequenceCheck::Apply => {
                        self.book.apply_delta(&delta);
                        DeltaOutcome::Applied(self.snapshot())
                    }
                    SequenceCheck::Stale => DeltaOutcome::Stale,
                    SequenceCheck::Gap { expected } => {
                        let received = delta.prev_seq.map(|p| p + 1).unwrap_or(delta.first_seq);
                        self.begin_resync();
                        self.push_buffer(delta);
                        DeltaOutcome::Gap { expected, received }
                    }
                }
            }
            BookState::Unprimed => {
                self.push_buffer(delta);
                if self.can_fetch {
                    self.state = BookState::Priming;
                    self.generation += 1;
                    DeltaOutcome::NeedsSnapshot
                } else {
                    DeltaOutcome::Buffered
                }
            }
            BookState::Priming | BookState::Gapped => {
                self.push_buffer(delta);
                DeltaOutcome::Buffered
            }
        }
    }

    /// Drop the book and go back to waiting for a snapshot
    fn begin_resync(&mut self) {
        self.state = BookState::Gapped;
        self.book.clear();
        self.generation += 1;
        self.state = if self.can_fetch {
            BookState::Priming
        } else {
            BookState::Unprimed
        };
    }

    fn on_fetched(&mut self, snapshot: &BookSnapshot, generation: u64) -> PrimeOutcome {
        if generation != self.generation || self.state != BookState::Priming {
            return PrimeOutcome::Ignored;
        }
        self.prime(snapshot)
    }

    fn on_pushed(&mut self, snapshot: &BookSnapshot) -> PrimeOutcome {
        // a pushed snapshot supersedes any outstanding fetch
        self.generation += 1;
        self.prime(snapshot)
    }

    fn prime(&mut self, snapshot: &BookSnapshot) -> PrimeOutcome {
        self.book.reset(snapshot);
        let mut first = true;
        while let Some(delta) = self.buffer.pop_front() {
            let current = self.book.sequence().unwrap_or(snapshot.sequence);
            if delta.last_seq <= current {
                continue;
            }
            let bridges = if first {
                delta.first_seq <= current + 1
            } else {
                check_sequence(current, &delta) == SequenceCheck::Apply
            };
            if !bridges {
                let received = delta.prev_seq.map(|p| p + 1).unwrap_or(delta.first_seq);
                self.buffer.push_front(delta);
                self.begin_resync();
                return PrimeOutcome::Gap {
                    expected: current + 1,
                    received,
                };
            }
            self.book.apply_delta(&delta);
            first = false;
        }
        self.state = BookState::Primed;
        PrimeOutcome::Primed(self.snapshot())
    }

    /// Returns true when the failure belongs to the current attempt
    fn on_fetch_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.state != BookState::Priming {
            return false;
        }
        self.state = BookState::Unprimed;
        true
    }

    fn reset(&mut self) {
        self.state = BookState::Unprimed;
        self.book.clear();
        self.buffer.clear();
        self.generation += 1;
    }
}

struct BookSlot {
    sync: Mutex<SymbolBook>,
    /// Last consistent book, readable without the sync lock
    published: ArcSwapOption<OrderBookSnapshot>,
}

/// Reconciles order books for every venue and symbol
///
/// State is per symbol: one symbol priming or gapped never blocks another.
pub struct OrderBookReconciler {
    books: DashMap<QualifiedSymbol, Arc<BookSlot>>,
    fetchers: HashMap<VenueId, Arc<dyn SnapshotFetcher>>,
    settings: HashMap<VenueId, BookSettings>,
    registry: Arc<SubscriptionRegistry>,
    fetches: AtomicU64,
}

impl OrderBookReconciler {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        OrderBookReconciler {
            books: DashMap::new(),
            fetchers: HashMap::new(),
            settings: HashMap::new(),
            registry,
            fetches: AtomicU64::new(0),
        }
    }

    /// Register a venue's settings and, for delta venues, its snapshot source
    pub fn with_venue(
        mut self,
        venue: VenueId,
        settings: BookSettings,
        fetcher: Option<Arc<dyn SnapshotFetcher>>,
    ) -> Self {
        if let Some(fetcher) = fetcher {
            self.fetchers.insert(venue.clone(), fetcher);
        }
        self.settings.insert(venue, settings);
        self
    }

    fn settings(&self, venue: &VenueId) -> BookSettings {
        self.settings.get(venue).cloned().unwrap_or_default()
    }

    fn slot(&self, key: &QualifiedSymbol) -> Arc<BookSlot> {
        self.books
            .entry(key.clone())
            .or_insert_with(|| {
                let settings = self.settings(&key.venue);
                let can_fetch = self.fetchers.contains_key(&key.venue);
                Arc::new(BookSlot {
                    sync: Mutex::new(SymbolBook::new(key, &settings, can_fetch)),
                    published: ArcSwapOption::empty(),
                })
            })
            .clone()
    }

    fn book_keys(key: &QualifiedSymbol) -> [StreamKey; 2] {
        let symbol_key = StreamKey::symbol(key.venue.clone(), Topic::OrderBook, key.symbol.clone());
        let aggregate = symbol_key.to_aggregate();
        [symbol_key, aggregate]
    }

    /// Store and fan out a consistent book; called with the symbol lock held
    /// so waiters see books in sequence order
    fn publish(&self, key: &QualifiedSymbol, slot: &BookSlot, book: Arc<OrderBookSnapshot>) {
        slot.published.store(Some(Arc::clone(&book)));
        let events = [MarketEvent::OrderBook(book)];
        for stream_key in Self::book_keys(key) {
            self.registry.resolve(&stream_key, &events, None);
        }
    }

    pub fn apply_delta(self: &Arc<Self>, venue: &VenueId, delta: BookDelta) {
        let key = QualifiedSymbol::new(venue.clone(), delta.symbol.clone());
        let slot = self.slot(&key);
        let mut book = slot.sync.lock();
        match book.on_delta(delta) {
            DeltaOutcome::Applied(snapshot) => self.publish(&key, &slot, snapshot),
            DeltaOutcome::NeedsSnapshot => {
                tracing::debug!("{} first update, requesting snapshot", key);
                self.spawn_fetch(key.clone(), book.generation);
            }
            DeltaOutcome::Gap { expected, received } => {
                tracing::warn!(
                    "{} sequence gap (expected {}, got {}), re-priming",
                    key,
                    expected,
                    received
                );
                if book.can_fetch {
                    self.spawn_fetch(key.clone(), book.generation);
                }
            }
            DeltaOutcome::Stale => {
                tracing::trace!("{} dropped stale update", key);
            }
            DeltaOutcome::Buffered => {}
        }
    }

    /// Apply a snapshot pushed over the stream
    pub fn apply_snapshot(self: &Arc<Self>, venue: &VenueId, snapshot: BookSnapshot) {
        let key = QualifiedSymbol::new(venue.clone(), snapshot.symbol.clone());
        let slot = self.slot(&key);
        let mut book = slot.sync.lock();
        let outcome = book.on_pushed(&snapshot);
        self.handle_prime(&key, &slot, &book, outcome);
    }

    fn handle_prime(
        self: &Arc<Self>,
        key: &QualifiedSymbol,
        slot: &BookSlot,
        book: &SymbolBook,
        outcome: PrimeOutcome,
    ) {
        match outcome {
            PrimeOutcome::Primed(snapshot) => {
                tracing::info!("{} synced at {}", key, snapshot.sequence);
                self.publish(key, slot, snapshot);
            }
            PrimeOutcome::Gap { expected, received } => {
                tracing::warn!(
                    "{} has gap in updates after snapshot (expected {}, got {})",
                    key,
                    expected,
                    received
                );
                if book.can_fetch {
                    self.spawn_fetch(key.clone(), book.generation);
                }
            }
            PrimeOutcome::Ignored => {
                tracing::debug!("{} discarded snapshot from an abandoned attempt", key);
            }
        }
    }

    fn spawn_fetch(self: &Arc<Self>, key: QualifiedSymbol, generation: u64) {
        let Some(fetcher) = self.fetchers.get(&key.venue).cloned() else {
            return;
        };
        let depth = self.settings(&key.venue).snapshot_depth;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = fetcher.fetch_snapshot(&key.symbol, depth).await;
            this.complete_fetch(&key, generation, result);
        });
    }

    fn complete_fetch(
        self: &Arc<Self>,
        key: &QualifiedSymbol,
        generation: u64,
        result: Result<BookSnapshot, FetchError>,
    ) {
        let slot = self.slot(key);
        let mut book = slot.sync.lock();
        match result {
            Ok(snapshot) => {
                let outcome = book.on_fetched(&snapshot, generation);
                self.handle_prime(key, &slot, &book, outcome);
            }
            Err(e) => {
                if !book.on_fetch_failed(generation) {
                    return;
                }
                tracing::error!("Failed to fetch snapshot for {}: {}", key, e);
                let error = StreamError::PrimingFailed {
                    symbol: key.symbol.clone(),
                    message: e.to_string(),
                };
                for stream_key in Self::book_keys(key) {
                    self.registry.fail(&stream_key, &error);
                }
            }
        }
    }

    /// Last consistent book for a symbol
    pub fn snapshot(&self, key: &QualifiedSymbol) -> Option<Arc<OrderBookSnapshot>> {
        self.books
            .get(key)
            .and_then(|slot| slot.published.load_full())
    }

    pub fn state(&self, key: &QualifiedSymbol) -> BookState {
        self.books
            .get(key)
            .map(|slot| slot.sync.lock().state)
            .unwrap_or(BookState::Unprimed)
    }

    /// Forget sequences after the transport carrying these books dropped
    pub fn reset<'a>(&self, keys: impl IntoIterator<Item = &'a QualifiedSymbol>) {
        for key in keys {
            if let Some(slot) = self.books.get(key).map(|s| Arc::clone(s.value())) {
                slot.sync.lock().reset();
                tracing::debug!("{} marked unprimed", key);
            }
        }
    }

    /// Snapshot fetches issued so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.books.clear();
    }
}
