//! Application Layer - Subscription lifecycle and stream synchronization
//!
//! - SubscriptionRegistry / MessageRouter: who waits for what, and delivery
//! - OrderBookReconciler: snapshot priming, sequencing and gap recovery
//! - EventStore: bounded caches of recent events
//! - ConnectionManager: one supervised connection per endpoint
//! - SessionKeepalive: authenticated session tokens
//! - StreamEngine: the facade tying them together

pub mod backoff;
pub mod connection_manager;
pub mod engine;
pub mod event_store;
pub mod keepalive;
pub mod reconciler;
pub mod registry;
pub mod router;
pub mod stream;

pub use backoff::BackoffPolicy;
pub use connection_manager::{
    ConnectionHandle, ConnectionManager, ConnectionNotice, ConnectionSettings, ConnectionState,
};
pub use engine::{StreamEngine, StreamEngineBuilder, VenueRegistration};
pub use event_store::{CacheLimits, EventStore};
pub use keepalive::{SessionKeepalive, SessionState, SessionToken};
pub use reconciler::{BookSettings, OrderBookReconciler};
pub use registry::{Registration, Released, StreamItem, SubscriptionRegistry, WaiterId};
pub use router::{MessageRouter, RouteAction};
pub use stream::MarketStream;
