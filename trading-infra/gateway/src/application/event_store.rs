//! Bounded caches of recent events per venue and symbol

use dashmap::DashMap;
use trading_core::{Order, Position, PositionSide, Timestamp, Trade};

use crate::domain::cache::{KeyedCache, TradeCache, select_recent};
use crate::domain::{MarketEvent, QualifiedSymbol, Topic, VenueId};

/// Capacity of each cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    /// Trades kept per symbol
    pub trades: usize,
    /// Orders kept per venue
    pub orders: usize,
    /// Positions kept per venue
    pub positions: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            trades: 1000,
            orders: 1000,
            positions: 1000,
        }
    }
}

type OrderKey = (String, String);
type PositionKey = (String, PositionSide);

/// Caches fed by the router, read by callers
pub struct EventStore {
    limits: CacheLimits,
    trades: DashMap<QualifiedSymbol, TradeCache>,
    orders: DashMap<VenueId, KeyedCache<OrderKey, Order>>,
    positions: DashMap<VenueId, KeyedCache<PositionKey, Position>>,
    latest: DashMap<(QualifiedSymbol, Topic), MarketEvent>,
}

impl EventStore {
    pub fn new(limits: CacheLimits) -> Self {
        EventStore {
            limits,
            trades: DashMap::new(),
            orders: DashMap::new(),
            positions: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    /// Record an event; order book events are owned by the reconciler
    pub fn record(&self, venue: &VenueId, event: &MarketEvent) {
        match event {
            MarketEvent::OrderBook(_) => {}
            MarketEvent::Trade(trade) => {
                let key = QualifiedSymbol::new(venue.clone(), trade.symbol.clone());
                self.trades
                    .entry(key)
                    .or_insert_with(|| TradeCache::new(self.limits.trades))
                    .append(trade.clone());
            }
            MarketEvent::Order(order) => {
                self.orders
                    .entry(venue.clone())
                    .or_insert_with(|| KeyedCache::new(self.limits.orders))
                    .upsert((order.symbol.clone(), order.id.clone()), order.clone());
            }
            MarketEvent::Position(position) => {
                self.positions
                    .entry(venue.clone())
                    .or_insert_with(|| KeyedCache::new(self.limits.positions))
                    .upsert((position.symbol.clone(), position.side), position.clone());
            }
            MarketEvent::Ticker(_) | MarketEvent::BidAsk(_) | MarketEvent::FundingRate(_) => {
                let key = QualifiedSymbol::new(venue.clone(), event.symbol());
                self.latest.insert((key, event.topic()), event.clone());
            }
        }
    }

    pub fn trades(
        &self,
        key: &QualifiedSymbol,
        since: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Vec<Trade> {
        self.trades
            .get(key)
            .map(|cache| cache.snapshot(since, limit))
            .unwrap_or_default()
    }

    /// Orders for a venue, optionally narrowed to one symbol
    pub fn orders(
        &self,
        venue: &VenueId,
        symbol: Option<&str>,
        since: Option<Timestamp>,
        limit: Option<usize>,
    ) -> Vec<Order> {
        self.orders
            .get(venue)
            .map(|cache| {
                select_recent(
                    cache.values().filter(|o| symbol.is_none_or(|s| o.symbol == s)),
                    since,
                    limit,
                )
            })
            .unwrap_or_default()
    }

    pub fn positions(&self, venue: &VenueId, symbol: Option<&str>) -> Vec<Position> {
        self.positions
            .get(venue)
            .map(|cache| {
                cache
                    .values()
                    .filter(|p| symbol.is_none_or(|s| p.symbol == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Most recent ticker, bid/ask or funding rate for a symbol
    pub fn latest(&self, key: &QualifiedSymbol, topic: Topic) -> Option<MarketEvent> {
        self.latest
            .get(&(key.clone(), topic))
            .map(|event| event.value().clone())
    }

    pub fn clear(&self) {
        self.trades.clear();
        self.orders.clear();
        self.positions.clear();
        self.latest.clear();
    }
}
