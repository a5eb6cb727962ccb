//! Error types for the gateway crate

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use trading_core::VenueId;

/// Normalized category of a venue rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    Exchange,
    RateLimit,
    Authentication,
    BadRequest,
    BadSymbol,
    InvalidOrder,
    InsufficientFunds,
    OrderNotFound,
    DDoSProtection,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectionKind::Exchange => "exchange",
            RejectionKind::RateLimit => "rate limit",
            RejectionKind::Authentication => "authentication",
            RejectionKind::BadRequest => "bad request",
            RejectionKind::BadSymbol => "bad symbol",
            RejectionKind::InvalidOrder => "invalid order",
            RejectionKind::InsufficientFunds => "insufficient funds",
            RejectionKind::OrderNotFound => "order not found",
            RejectionKind::DDoSProtection => "ddos protection",
        };
        write!(f, "{}", name)
    }
}

/// Coarse error taxonomy used by callers to decide on retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientNetwork,
    ProtocolGap,
    VenueRejection,
    AuthExpired,
    FatalConfiguration,
    /// Reconnect budget spent; the endpoint was torn down
    Unreachable,
    Timeout,
    Closed,
}

/// Errors delivered to stream subscribers
///
/// Cloneable so one failure can be fanned out to every waiter of a key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Transient network error on {endpoint}: {message}")]
    TransientNetwork { endpoint: String, message: String },

    #[error("Sequence gap on {symbol}: book at {expected}, update starts at {received}")]
    ProtocolGap {
        symbol: String,
        expected: u64,
        received: u64,
    },

    #[error("Snapshot for {symbol} unavailable: {message}")]
    PrimingFailed { symbol: String, message: String },

    #[error("{venue} rejected request ({kind}, code {code}): {message}")]
    VenueRejection {
        venue: VenueId,
        kind: RejectionKind,
        code: String,
        message: String,
    },

    #[error("Session expired on {venue}")]
    AuthExpired { venue: VenueId },

    #[error("Configuration error: {0}")]
    FatalConfiguration(String),

    #[error("Gave up on {endpoint} after {attempts} connection attempts")]
    RetriesExhausted { endpoint: String, attempts: u32 },

    #[error("No update within {0:?}")]
    Timeout(Duration),

    #[error("Stream closed: {0}")]
    Closed(String),
}

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            StreamError::RetriesExhausted { .. } => ErrorKind::Unreachable,
            StreamError::ProtocolGap { .. } | StreamError::PrimingFailed { .. } => {
                ErrorKind::ProtocolGap
            }
            StreamError::VenueRejection { .. } => ErrorKind::VenueRejection,
            StreamError::AuthExpired { .. } => ErrorKind::AuthExpired,
            StreamError::FatalConfiguration(_) => ErrorKind::FatalConfiguration,
            StreamError::Timeout(_) => ErrorKind::Timeout,
            StreamError::Closed(_) => ErrorKind::Closed,
        }
    }

    /// Whether subscribing again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::TransientNetwork { .. }
            | StreamError::ProtocolGap { .. }
            | StreamError::PrimingFailed { .. }
            | StreamError::AuthExpired { .. }
            | StreamError::Timeout(_) => true,
            StreamError::VenueRejection { kind, .. } => {
                matches!(kind, RejectionKind::RateLimit | RejectionKind::DDoSProtection)
            }
            StreamError::FatalConfiguration(_)
            | StreamError::RetriesExhausted { .. }
            | StreamError::Closed(_) => false,
        }
    }
}

/// Per-venue mapping from error codes and message fragments to rejection kinds
///
/// Exact code matches win over message fragments; anything unmatched is
/// reported as [`RejectionKind::Exchange`].
#[derive(Debug, Clone, Default)]
pub struct ErrorTable {
    exact: HashMap<String, RejectionKind>,
    broad: Vec<(String, RejectionKind)>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exact(mut self, code: impl Into<String>, kind: RejectionKind) -> Self {
        self.exact.insert(code.into(), kind);
        self
    }

    pub fn exact_many(mut self, codes: &[&str], kind: RejectionKind) -> Self {
        for code in codes {
            self.exact.insert((*code).to_string(), kind);
        }
        self
    }

    pub fn broad(mut self, fragment: impl Into<String>, kind: RejectionKind) -> Self {
        self.broad.push((fragment.into().to_lowercase(), kind));
        self
    }

    pub fn classify(&self, code: &str, message: &str) -> RejectionKind {
        if let Some(kind) = self.exact.get(code) {
            return *kind;
        }
        let message = message.to_lowercase();
        self.broad
            .iter()
            .find(|(fragment, _)| message.contains(fragment.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(RejectionKind::Exchange)
    }
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ErrorTable {
        ErrorTable::new()
            .exact("-1003", RejectionKind::RateLimit)
            .exact_many(&["-2011", "-2013"], RejectionKind::OrderNotFound)
            .broad("Too many requests", RejectionKind::RateLimit)
            .broad("invalid channel", RejectionKind::BadSymbol)
    }

    #[test]
    fn test_exact_code_wins() {
        let table = table();
        assert_eq!(table.classify("-1003", "whatever"), RejectionKind::RateLimit);
        assert_eq!(
            table.classify("-2013", "invalid channel"),
            RejectionKind::OrderNotFound
        );
    }

    #[test]
    fn test_broad_match_is_case_insensitive() {
        let table = table();
        assert_eq!(
            table.classify("400", "Invalid Channel: foo.bar"),
            RejectionKind::BadSymbol
        );
        assert_eq!(table.classify("1", "nothing known"), RejectionKind::Exchange);
    }

    #[test]
    fn test_retryable_classification() {
        let rate_limited = StreamError::VenueRejection {
            venue: VenueId::asterdex(),
            kind: RejectionKind::RateLimit,
            code: "-1003".to_string(),
            message: "slow down".to_string(),
        };
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.kind(), ErrorKind::VenueRejection);

        let bad_symbol = StreamError::VenueRejection {
            venue: VenueId::paradex(),
            kind: RejectionKind::BadSymbol,
            code: "-32600".to_string(),
            message: "invalid channel".to_string(),
        };
        assert!(!bad_symbol.is_retryable());

        let exhausted = StreamError::RetriesExhausted {
            endpoint: "wss://x".to_string(),
            attempts: 10,
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(exhausted.kind(), ErrorKind::Unreachable);
    }
}
