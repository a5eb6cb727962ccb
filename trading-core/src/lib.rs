pub mod entities;
pub mod messages;
pub mod value_objects;

// Re-export value objects at crate root for convenience
pub use value_objects::{PositionSide, Side, Timestamp, timestamp_to_datetime};

// Re-export entities at crate root
pub use entities::{BidAsk, FundingRate, Order, OrderStatus, Position, PriceLevel, Ticker, Trade};

// Re-export venue identifiers at crate root
pub use messages::{QualifiedSymbol, VenueId};
