//! Working order book and its published snapshot form
//!
//! `OrderBook` is mutated only by the reconciler. Readers get an
//! `OrderBookSnapshot`, an immutable copy taken after a complete update.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use trading_core::{PriceLevel, Timestamp, VenueId};

use super::events::{BookDelta, BookSnapshot};

/// How an incoming delta relates to the book's current sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Next in sequence
    Apply,
    /// Already covered by the book
    Stale,
    /// Something was missed
    Gap { expected: u64 },
}

/// Decide whether `delta` continues a book at `current`
///
/// Predecessor-chained deltas must name `current` exactly. Range deltas
/// must overlap `current + 1`.
pub fn check_sequence(current: u64, delta: &BookDelta) -> SequenceCheck {
    if let Some(prev) = delta.prev_seq {
        return if prev == current {
            SequenceCheck::Apply
        } else if prev < current {
            SequenceCheck::Stale
        } else {
            SequenceCheck::Gap {
                expected: current + 1,
            }
        };
    }

    if delta.last_seq <= current {
        SequenceCheck::Stale
    } else if delta.first_seq > current + 1 {
        SequenceCheck::Gap {
            expected: current + 1,
        }
    } else {
        SequenceCheck::Apply
    }
}

/// Mutable order book for one symbol
///
/// Uses BTreeMap for price levels to maintain sorted order.
/// Bids iterate descending from the back, asks ascending from the front.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    sequence: Option<u64>,
    timestamp: Option<Timestamp>,
    max_depth: Option<usize>,
}

impl OrderBook {
    pub fn new(max_depth: Option<usize>) -> Self {
        OrderBook {
            max_depth,
            ..Default::default()
        }
    }

    /// Replace all state with a snapshot
    pub fn reset(&mut self, snapshot: &BookSnapshot) {
        self.bids.clear();
        self.asks.clear();
        Self::apply_side(&mut self.bids, &snapshot.bids);
        Self::apply_side(&mut self.asks, &snapshot.asks);
        self.sequence = Some(snapshot.sequence);
        self.timestamp = snapshot.timestamp;
        self.truncate();
    }

    /// Apply a delta's levels and advance the sequence to its final id
    pub fn apply_delta(&mut self, delta: &BookDelta) {
        Self::apply_side(&mut self.bids, &delta.bids);
        Self::apply_side(&mut self.asks, &delta.asks);
        self.sequence = Some(delta.last_seq);
        if delta.timestamp.is_some() {
            self.timestamp = delta.timestamp;
        }
        self.truncate();
    }

    fn apply_side(side: &mut BTreeMap<Decimal, Decimal>, levels: &[PriceLevel]) {
        for level in levels {
            if level.is_removal() {
                side.remove(&level.price);
            } else {
                side.insert(level.price, level.size);
            }
        }
    }

    fn truncate(&mut self) {
        let Some(depth) = self.max_depth else {
            return;
        };
        while self.bids.len() > depth {
            self.bids.pop_first();
        }
        while self.asks.len() > depth {
            self.asks.pop_last();
        }
    }

    /// Drop all levels and forget the sequence
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence = None;
        self.timestamp = None;
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, q)| PriceLevel::new(*p, *q))
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, q)| PriceLevel::new(*p, *q))
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Immutable copy for readers
    pub fn snapshot(&self, venue: &VenueId, symbol: &str) -> OrderBookSnapshot {
        OrderBookSnapshot {
            venue: venue.clone(),
            symbol: symbol.to_string(),
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(p, q)| PriceLevel::new(*p, *q))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, q)| PriceLevel::new(*p, *q))
                .collect(),
            sequence: self.sequence.unwrap_or(0),
            timestamp: self.timestamp,
        }
    }
}

/// Published, consistent view of an order book
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookSnapshot {
    pub venue: VenueId,
    pub symbol: String,
    /// Highest price first
    pub bids: Vec<PriceLevel>,
    /// Lowest price first
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub timestamp: Option<Timestamp>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lvl(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    fn snapshot(sequence: u64) -> BookSnapshot {
        BookSnapshot {
            symbol: "BTCUSDT".to_string(),
            sequence,
            bids: vec![lvl(dec!(99), dec!(1)), lvl(dec!(98), dec!(2))],
            asks: vec![lvl(dec!(101), dec!(1)), lvl(dec!(102), dec!(2))],
            timestamp: Some(1),
        }
    }

    #[test]
    fn test_chained_sequence_decisions() {
        let next = BookDelta::chained("BTCUSDT", 100, 101);
        assert_eq!(check_sequence(100, &next), SequenceCheck::Apply);

        let old = BookDelta::chained("BTCUSDT", 99, 100);
        assert_eq!(check_sequence(101, &old), SequenceCheck::Stale);

        let ahead = BookDelta::chained("BTCUSDT", 105, 106);
        assert_eq!(
            check_sequence(101, &ahead),
            SequenceCheck::Gap { expected: 102 }
        );
    }

    #[test]
    fn test_ranged_sequence_decisions() {
        assert_eq!(
            check_sequence(100, &BookDelta::ranged("X", 95, 105)),
            SequenceCheck::Apply
        );
        assert_eq!(
            check_sequence(100, &BookDelta::ranged("X", 101, 101)),
            SequenceCheck::Apply
        );
        assert_eq!(
            check_sequence(100, &BookDelta::ranged("X", 90, 100)),
            SequenceCheck::Stale
        );
        assert_eq!(
            check_sequence(100, &BookDelta::ranged("X", 102, 110)),
            SequenceCheck::Gap { expected: 101 }
        );
    }

    #[test]
    fn test_delta_updates_and_removes_levels() {
        let mut book = OrderBook::new(None);
        book.reset(&snapshot(100));

        let delta = BookDelta::chained("BTCUSDT", 100, 101).with_levels(
            vec![lvl(dec!(99), dec!(0)), lvl(dec!(99.5), dec!(3))],
            vec![lvl(dec!(101), dec!(4))],
        );
        book.apply_delta(&delta);

        assert_eq!(book.sequence(), Some(101));
        assert_eq!(book.best_bid(), Some(lvl(dec!(99.5), dec!(3))));
        assert_eq!(book.best_ask(), Some(lvl(dec!(101), dec!(4))));

        let snap = book.snapshot(&VenueId::asterdex(), "BTCUSDT");
        assert_eq!(snap.bids, vec![lvl(dec!(99.5), dec!(3)), lvl(dec!(98), dec!(2))]);
        assert_eq!(snap.spread(), Some(dec!(1.5)));
    }

    #[test]
    fn test_depth_truncation_keeps_best_levels() {
        let mut book = OrderBook::new(Some(1));
        book.reset(&snapshot(7));

        let snap = book.snapshot(&VenueId::asterdex(), "BTCUSDT");
        assert_eq!(snap.bids, vec![lvl(dec!(99), dec!(1))]);
        assert_eq!(snap.asks, vec![lvl(dec!(101), dec!(1))]);
        assert_eq!(snap.mid_price(), Some(dec!(100)));
    }

    #[test]
    fn test_clear_forgets_sequence() {
        let mut book = OrderBook::new(None);
        book.reset(&snapshot(5));
        book.clear();
        assert!(book.is_empty());
        assert_eq!(book.sequence(), None);
    }
}
