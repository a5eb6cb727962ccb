//! Bounded event caches
//!
//! Trades are an append-only log per symbol. Orders and positions are keyed:
//! a newer record replaces the older one with the same key.

use std::collections::VecDeque;
use std::hash::Hash;

use indexmap::IndexMap;
use trading_core::{Order, Position, Timestamp, Trade};

/// Records that can be filtered by time
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl Timestamped for Trade {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Timestamped for Order {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

impl Timestamped for Position {
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Keep records at or after `since`, then the most recent `limit` of them
///
/// Input is oldest-first and so is the output.
pub fn select_recent<'a, T, I>(records: I, since: Option<Timestamp>, limit: Option<usize>) -> Vec<T>
where
    T: Timestamped + Clone + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut selected: Vec<T> = records
        .filter(|r| since.is_none_or(|s| r.timestamp() >= s))
        .cloned()
        .collect();
    if let Some(limit) = limit
        && selected.len() > limit
    {
        selected.drain(..selected.len() - limit);
    }
    selected
}

/// Append-only trade log for one symbol; oldest entries fall off first
#[derive(Debug, Clone)]
pub struct TradeCache {
    capacity: usize,
    trades: VecDeque<Trade>,
}

impl TradeCache {
    pub fn new(capacity: usize) -> Self {
        TradeCache {
            capacity: capacity.max(1),
            trades: VecDeque::new(),
        }
    }

    /// Append a trade, returning the evicted one when full
    pub fn append(&mut self, trade: Trade) -> Option<Trade> {
        let evicted = if self.trades.len() >= self.capacity {
            self.trades.pop_front()
        } else {
            None
        };
        self.trades.push_back(trade);
        evicted
    }

    pub fn snapshot(&self, since: Option<Timestamp>, limit: Option<usize>) -> Vec<Trade> {
        select_recent(self.trades.iter(), since, limit)
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Insertion-ordered map bounded by capacity
///
/// Updating an existing key keeps its slot, so eviction follows first-seen
/// order rather than last-updated order.
#[derive(Debug, Clone)]
pub struct KeyedCache<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K: Hash + Eq, V> KeyedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        KeyedCache {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    /// Insert or replace; returns the evicted oldest entry when full
    pub fn upsert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0)
        } else {
            None
        };
        self.entries.insert(key, value);
        evicted
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
