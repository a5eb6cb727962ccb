//! Gateway Crate
//!
//! Streaming synchronization engine for perpetual-futures venues.
//!
//! # Architecture
//!
//! Callers subscribe to `(venue, topic, symbol)` streams. Subscriptions to
//! the same key share one wire subscription, and keys on the same endpoint
//! share one supervised connection.
//!
//! ```text
//! ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//! │  AsterDEX   │  │   Paradex   │  │   Lighter   │  │  Extended   │
//! └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!        │ WebSocket      │                │                │
//!        ▼                ▼                ▼                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      ConnectionManager                        │
//! │        (one worker per endpoint, backoff, heartbeats)         │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        MessageRouter                          │
//! │   VenueAdapter::classify ──► OrderBookReconciler (books)      │
//! │                         └──► EventStore (trades, orders, ...) │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SubscriptionRegistry                      │
//! │               (waiters per key, fan-out, errors)              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//!                         MarketStream (caller)
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export key types
pub use domain::{
    BookDelta, BookSnapshot, BookState, Endpoint, MarketEvent, OrderBookSnapshot, QualifiedSymbol,
    StreamKey, Topic, VenueId,
};
pub use domain::traits::{
    FetchError, SessionGrant, SessionIssuer, SnapshotFetcher, Transport, TransportChannels,
    VenueAdapter, WireMessage,
};
pub use error::{ErrorKind, ErrorTable, RejectionKind, StreamError, TransportError};

pub use application::{
    BackoffPolicy, BookSettings, CacheLimits, ConnectionSettings, MarketStream, SessionState,
    StreamEngine, StreamEngineBuilder, VenueRegistration,
};

pub use infrastructure::{RestClient, RestError, WsTransport};

pub use config::{GatewayConfigFile, VenueConfig, load_config, load_default_config};
