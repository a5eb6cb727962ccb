//! Venue identifiers, stream topics and registry keys
//!
//! Venue and symbol identifiers are re-exported from trading-core so that the
//! records handed to callers and the keys used internally agree.

use std::fmt;

pub use trading_core::{QualifiedSymbol, VenueId};

/// A transport target: one network connection per endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub venue: VenueId,
    pub url: String,
    /// Authenticated endpoints carry a session token in their URL
    pub private: bool,
}

impl Endpoint {
    pub fn public(venue: VenueId, url: impl Into<String>) -> Self {
        Endpoint {
            venue,
            url: url.into(),
            private: false,
        }
    }

    pub fn private(venue: VenueId, url: impl Into<String>) -> Self {
        Endpoint {
            venue,
            url: url.into(),
            private: true,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.private {
            // the URL embeds the session token
            write!(f, "{}[private]", self.venue)
        } else {
            write!(f, "{}[{}]", self.venue, self.url)
        }
    }
}

/// Logical category of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Trades,
    OrderBook,
    Ticker,
    BidAsk,
    FundingRate,
    Orders,
    Positions,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Trades => "trades",
            Topic::OrderBook => "orderbook",
            Topic::Ticker => "ticker",
            Topic::BidAsk => "bidask",
            Topic::FundingRate => "fundingrate",
            Topic::Orders => "orders",
            Topic::Positions => "positions",
        }
    }

    pub const ALL: [Topic; 7] = [
        Topic::Trades,
        Topic::OrderBook,
        Topic::Ticker,
        Topic::BidAsk,
        Topic::FundingRate,
        Topic::Orders,
        Topic::Positions,
    ];

    /// Parse the name produced by [`Topic::as_str`]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.as_str().eq_ignore_ascii_case(raw))
    }

    /// Account topics need an authenticated session
    pub fn is_private(&self) -> bool {
        matches!(self, Topic::Orders | Topic::Positions)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a waiter is waiting for: a topic on one symbol, or on every symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub venue: VenueId,
    pub topic: Topic,
    /// `None` is the topic-level aggregate key
    pub symbol: Option<String>,
}

impl StreamKey {
    pub fn symbol(venue: VenueId, topic: Topic, symbol: impl Into<String>) -> Self {
        StreamKey {
            venue,
            topic,
            symbol: Some(symbol.into()),
        }
    }

    pub fn aggregate(venue: VenueId, topic: Topic) -> Self {
        StreamKey {
            venue,
            topic,
            symbol: None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.symbol.is_none()
    }

    /// The topic-level key this key rolls up into
    pub fn to_aggregate(&self) -> StreamKey {
        StreamKey::aggregate(self.venue.clone(), self.topic)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}/{}:{}", self.venue, self.topic, symbol),
            None => write!(f, "{}/{}:*", self.venue, self.topic),
        }
    }
}
