pub mod cache;
pub mod events;
pub mod exchange;
pub mod order_book;
pub mod sync_status;
pub mod traits;

pub use cache::{KeyedCache, TradeCache};
pub use events::{
    BookDelta, BookSnapshot, ControlFrame, InboundFrame, MarketEvent, VenueEvent,
};
pub use exchange::{Endpoint, QualifiedSymbol, StreamKey, Topic, VenueId};
pub use order_book::{OrderBook, OrderBookSnapshot, SequenceCheck, check_sequence};
pub use sync_status::BookState;
pub use traits::{
    ChannelRequest, ClientKeepalive, FetchError, SessionGrant, SessionIssuer, SnapshotFetcher,
    Transport, TransportChannels, Unsubscribe, VenueAdapter, WireMessage,
};
