//! Message router
//!
//! Classifies each inbound frame through the venue adapter and dispatches
//! it: book events to the reconciler, everything else to the caches and the
//! waiters of its key and of its topic-level aggregate key.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use super::event_store::EventStore;
use super::reconciler::OrderBookReconciler;
use super::registry::SubscriptionRegistry;
use crate::domain::{
    ControlFrame, Endpoint, InboundFrame, MarketEvent, StreamKey, Topic, VenueAdapter, VenueEvent,
    VenueId,
};
use crate::error::StreamError;

/// What the connection owning the frame must do next
#[derive(Debug, Clone, PartialEq)]
pub enum RouteAction {
    /// Send this frame back on the same connection
    Reply(String),
    Acknowledged(Option<u64>),
    Rejected {
        request_id: Option<u64>,
        error: StreamError,
    },
    SessionExpired,
}

pub struct MessageRouter {
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    registry: Arc<SubscriptionRegistry>,
    reconciler: Arc<OrderBookReconciler>,
    store: Arc<EventStore>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        reconciler: Arc<OrderBookReconciler>,
        store: Arc<EventStore>,
    ) -> Self {
        MessageRouter {
            adapters: HashMap::new(),
            registry,
            reconciler,
            store,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn VenueAdapter>) -> Self {
        self.adapters.insert(adapter.venue().clone(), adapter);
        self
    }

    pub fn adapter(&self, venue: &VenueId) -> Option<&Arc<dyn VenueAdapter>> {
        self.adapters.get(venue)
    }

    /// Route one text frame received on `endpoint`
    pub fn route(&self, endpoint: &Endpoint, raw: &str) -> Vec<RouteAction> {
        let Some(adapter) = self.adapters.get(&endpoint.venue) else {
            tracing::warn!("No adapter for {}, dropping frame", endpoint.venue);
            return Vec::new();
        };

        match adapter.classify(raw) {
            InboundFrame::Update(events) | InboundFrame::Aggregate(events) => {
                self.dispatch(endpoint, events);
                Vec::new()
            }
            InboundFrame::Control(frame) => self.control(adapter.as_ref(), frame).into_iter().collect(),
            InboundFrame::Ignored => {
                tracing::trace!("{} ignored frame: {}", endpoint, raw);
                Vec::new()
            }
        }
    }

    fn dispatch(&self, endpoint: &Endpoint, events: Vec<VenueEvent>) {
        let venue = &endpoint.venue;
        let mut by_topic: IndexMap<Topic, Vec<MarketEvent>> = IndexMap::new();

        for event in events {
            match event {
                VenueEvent::BookDelta(delta) => {
                    if self.tracks_book(venue, &delta.symbol) {
                        self.reconciler.apply_delta(venue, delta);
                    }
                }
                VenueEvent::BookSnapshot(snapshot) => {
                    if self.tracks_book(venue, &snapshot.symbol) {
                        self.reconciler.apply_snapshot(venue, snapshot);
                    }
                }
                other => {
                    if let Some(event) = MarketEvent::from_venue(other) {
                        self.store.record(venue, &event);
                        by_topic.entry(event.topic()).or_default().push(event);
                    }
                }
            }
        }

        for (topic, events) in by_topic {
            let mut by_symbol: IndexMap<&str, Vec<MarketEvent>> = IndexMap::new();
            for event in &events {
                by_symbol
                    .entry(event.symbol())
                    .or_default()
                    .push(event.clone());
            }
            for (symbol, group) in &by_symbol {
                let key = StreamKey::symbol(venue.clone(), topic, *symbol);
                self.registry.resolve(&key, group, Some(endpoint));
            }
            let aggregate = StreamKey::aggregate(venue.clone(), topic);
            self.registry.resolve(&aggregate, &events, Some(endpoint));
        }
    }

    /// Books nobody subscribes to anymore must not be primed again by late frames
    fn tracks_book(&self, venue: &VenueId, symbol: &str) -> bool {
        let key = StreamKey::symbol(venue.clone(), Topic::OrderBook, symbol);
        let tracked = self.registry.contains(&key) || self.registry.contains(&key.to_aggregate());
        if !tracked {
            tracing::trace!("{} book update for unsubscribed {}", venue, symbol);
        }
        tracked
    }

    fn control(&self, adapter: &dyn VenueAdapter, frame: ControlFrame) -> Option<RouteAction> {
        match frame {
            ControlFrame::Ping { reply } => reply.map(RouteAction::Reply),
            ControlFrame::Pong | ControlFrame::Welcome => None,
            ControlFrame::Ack { request_id } => Some(RouteAction::Acknowledged(request_id)),
            ControlFrame::Error {
                request_id,
                code,
                message,
            } => {
                let kind = adapter.error_table().classify(&code, &message);
                tracing::warn!("{} error {} ({}): {}", adapter.venue(), code, kind, message);
                Some(RouteAction::Rejected {
                    request_id,
                    error: StreamError::VenueRejection {
                        venue: adapter.venue().clone(),
                        kind,
                        code,
                        message,
                    },
                })
            }
            ControlFrame::SessionExpired => Some(RouteAction::SessionExpired),
        }
    }
}
