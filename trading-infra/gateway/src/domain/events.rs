//! Parser-boundary events
//!
//! Venue adapters turn raw frames into these typed values. Nothing past the
//! adapter sees venue JSON.

use std::sync::Arc;

use trading_core::{BidAsk, FundingRate, Order, Position, PriceLevel, Ticker, Timestamp, Trade};

use super::exchange::Topic;
use super::order_book::OrderBookSnapshot;

/// Incremental order book change
///
/// Venues chain deltas either by range (`first_seq..=last_seq`) or by
/// naming the previous delta's final sequence (`prev_seq`).
#[derive(Debug, Clone, PartialEq)]
pub struct BookDelta {
    pub symbol: String,
    pub first_seq: u64,
    pub last_seq: u64,
    pub prev_seq: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: Option<Timestamp>,
}

impl BookDelta {
    /// Delta covering an explicit update-id range
    pub fn ranged(symbol: impl Into<String>, first_seq: u64, last_seq: u64) -> Self {
        BookDelta {
            symbol: symbol.into(),
            first_seq,
            last_seq,
            prev_seq: None,
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: None,
        }
    }

    /// Delta that names its predecessor
    pub fn chained(symbol: impl Into<String>, prev_seq: u64, next_seq: u64) -> Self {
        BookDelta {
            symbol: symbol.into(),
            first_seq: prev_seq + 1,
            last_seq: next_seq,
            prev_seq: Some(prev_seq),
            bids: Vec::new(),
            asks: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_levels(mut self, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        self.bids = bids;
        self.asks = asks;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Full order book state at a sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshot {
    pub symbol: String,
    pub sequence: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: Option<Timestamp>,
}

/// A typed data event from a venue
#[derive(Debug, Clone, PartialEq)]
pub enum VenueEvent {
    BookDelta(BookDelta),
    /// Snapshot pushed over the stream (venues that never send deltas)
    BookSnapshot(BookSnapshot),
    Trade(Trade),
    Ticker(Ticker),
    BidAsk(BidAsk),
    FundingRate(FundingRate),
    Order(Order),
    Position(Position),
}

impl VenueEvent {
    pub fn topic(&self) -> Topic {
        match self {
            VenueEvent::BookDelta(_) | VenueEvent::BookSnapshot(_) => Topic::OrderBook,
            VenueEvent::Trade(_) => Topic::Trades,
            VenueEvent::Ticker(_) => Topic::Ticker,
            VenueEvent::BidAsk(_) => Topic::BidAsk,
            VenueEvent::FundingRate(_) => Topic::FundingRate,
            VenueEvent::Order(_) => Topic::Orders,
            VenueEvent::Position(_) => Topic::Positions,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            VenueEvent::BookDelta(d) => &d.symbol,
            VenueEvent::BookSnapshot(s) => &s.symbol,
            VenueEvent::Trade(t) => &t.symbol,
            VenueEvent::Ticker(t) => &t.symbol,
            VenueEvent::BidAsk(b) => &b.symbol,
            VenueEvent::FundingRate(f) => &f.symbol,
            VenueEvent::Order(o) => &o.symbol,
            VenueEvent::Position(p) => &p.symbol,
        }
    }
}

/// Protocol-level frames that carry no market data
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// Application-level ping; `reply` is the frame to answer with
    Ping { reply: Option<String> },
    Pong,
    /// Venue confirmed a subscribe/unsubscribe request
    Ack { request_id: Option<u64> },
    Error {
        request_id: Option<u64>,
        code: String,
        message: String,
    },
    /// The venue says the session token is no longer valid
    SessionExpired,
    Welcome,
}

/// Classification of one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Events addressed to specific symbols
    Update(Vec<VenueEvent>),
    /// One frame covering many symbols of a topic
    Aggregate(Vec<VenueEvent>),
    Control(ControlFrame),
    /// Recognized but carries nothing of interest, or unparseable
    Ignored,
}

/// What subscribers receive
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    OrderBook(Arc<OrderBookSnapshot>),
    Trade(Trade),
    Ticker(Ticker),
    BidAsk(BidAsk),
    FundingRate(FundingRate),
    Order(Order),
    Position(Position),
}

impl MarketEvent {
    pub fn topic(&self) -> Topic {
        match self {
            MarketEvent::OrderBook(_) => Topic::OrderBook,
            MarketEvent::Trade(_) => Topic::Trades,
            MarketEvent::Ticker(_) => Topic::Ticker,
            MarketEvent::BidAsk(_) => Topic::BidAsk,
            MarketEvent::FundingRate(_) => Topic::FundingRate,
            MarketEvent::Order(_) => Topic::Orders,
            MarketEvent::Position(_) => Topic::Positions,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::OrderBook(b) => &b.symbol,
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::Ticker(t) => &t.symbol,
            MarketEvent::BidAsk(b) => &b.symbol,
            MarketEvent::FundingRate(f) => &f.symbol,
            MarketEvent::Order(o) => &o.symbol,
            MarketEvent::Position(p) => &p.symbol,
        }
    }

    /// Convert a non-book venue event; book events go through reconciliation
    pub fn from_venue(event: VenueEvent) -> Option<Self> {
        match event {
            VenueEvent::BookDelta(_) | VenueEvent::BookSnapshot(_) => None,
            VenueEvent::Trade(t) => Some(MarketEvent::Trade(t)),
            VenueEvent::Ticker(t) => Some(MarketEvent::Ticker(t)),
            VenueEvent::BidAsk(b) => Some(MarketEvent::BidAsk(b)),
            VenueEvent::FundingRate(f) => Some(MarketEvent::FundingRate(f)),
            VenueEvent::Order(o) => Some(MarketEvent::Order(o)),
            VenueEvent::Position(p) => Some(MarketEvent::Position(p)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chained_delta_range() {
        let delta = BookDelta::chained("BTCUSDT", 100, 101);
        assert_eq!(delta.first_seq, 101);
        assert_eq!(delta.last_seq, 101);
        assert_eq!(delta.prev_seq, Some(100));
        assert_eq!(VenueEvent::BookDelta(delta).topic(), Topic::OrderBook);
    }
}
