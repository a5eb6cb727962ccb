//! Infrastructure Layer - Inbound adapters from upstream venues
//!
//! - WsTransport: WebSocket transport for venue streams
//! - RestClient: HTTP client for snapshots and session keys
//! - venues: per-venue channel naming and frame parsing

pub mod rest_client;
pub mod venues;
pub mod ws_client;

pub use rest_client::{RestClient, RestError};
pub use venues::{AsterdexAdapter, ExtendedAdapter, LighterAdapter, ParadexAdapter, adapter_for};
pub use ws_client::WsTransport;
