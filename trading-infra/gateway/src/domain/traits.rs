use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use super::events::{BookSnapshot, InboundFrame};
use super::exchange::{Topic, VenueId};
use crate::error::{ErrorTable, StreamError, TransportError};

/// Domain error for REST fetches (snapshots, session tokens)
///
/// This is a domain-level abstraction that doesn't expose infrastructure details.
/// Infrastructure implementations convert their specific errors to this type.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// Network or communication failure
    Network(String),
    /// API returned an error response
    Api { code: i64, message: String },
    /// Failed to parse the response
    Parse(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "Network error: {}", msg),
            FetchError::Api { code, message } => write!(f, "API error {}: {}", code, message),
            FetchError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

/// Trait for fetching full order book snapshots over REST
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str, depth: usize) -> Result<BookSnapshot, FetchError>;
}

/// A freshly issued session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: String,
    /// How long the venue keeps the token alive without renewal
    pub validity: Duration,
}

/// Trait for issuing and extending authenticated stream sessions
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self) -> Result<SessionGrant, FetchError>;

    async fn renew(&self, token: &str) -> Result<(), FetchError>;

    /// Revoke the token; venues without revocation let it lapse
    async fn close(&self, _token: &str) -> Result<(), FetchError> {
        Ok(())
    }
}

/// Frames exchanged with a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Both directions of an open connection
///
/// The inbound channel closing means the connection is gone.
pub struct TransportChannels {
    pub outbound: mpsc::Sender<WireMessage>,
    pub inbound: mpsc::Receiver<WireMessage>,
}

/// Trait for opening message-oriented connections
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<TransportChannels, TransportError>;
}

/// How a channel is torn down once nobody listens to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsubscribe {
    Frame(String),
    /// URL-scoped streams: close the connection once it carries nothing else
    CloseConnection,
    Nothing,
}

/// Wire-level subscription for one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Venue channel name; keys sharing a channel share one subscription
    pub channel: String,
    /// Frame to send, `None` when the URL alone selects the stream
    pub subscribe: Option<String>,
    pub unsubscribe: Unsubscribe,
    /// Id echoed back by the venue on ack or rejection
    pub request_id: Option<u64>,
    pub resend_on_reconnect: bool,
}

/// Application-level ping sent on a fixed interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeepalive {
    pub interval: Duration,
    pub frame: String,
}

/// Everything venue-specific: URLs, channel naming, frame classification
///
/// Implements Open/Closed - adding a venue means adding an adapter.
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> &VenueId;

    fn supports(&self, topic: Topic) -> bool;

    /// URL of the public endpoint serving `topic` for `symbol` (`None` = all)
    fn public_url(&self, topic: Topic, symbol: Option<&str>) -> Result<String, StreamError>;

    /// URL of the private endpoint bound to a session token
    fn private_url(&self, _token: &str) -> Result<String, StreamError> {
        Err(StreamError::FatalConfiguration(format!(
            "{} has no authenticated streams",
            self.venue()
        )))
    }

    fn channel(&self, topic: Topic, symbol: Option<&str>) -> Result<ChannelRequest, StreamError>;

    /// Classify a raw text frame; unparseable frames are `Ignored`
    fn classify(&self, raw: &str) -> InboundFrame;

    fn keepalive(&self) -> Option<ClientKeepalive> {
        None
    }

    fn error_table(&self) -> &ErrorTable;
}
